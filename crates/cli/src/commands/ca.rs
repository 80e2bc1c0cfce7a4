//! Certificate authority commands

use colored::Colorize;
use phonon_signer::LocalCaSigner;
use tracing::info;

/// Generate a CA key pair and print both halves
pub fn generate_ca_command() -> anyhow::Result<()> {
    let ca = LocalCaSigner::random();
    info!("generated CA key pair");

    println!("{}", "\u{1F511} CA key pair generated".green().bold());
    println!("\nPrivate key (KEEP THIS SECRET):");
    println!("  {}", hex::encode(ca.private_key_bytes().as_slice()));
    println!("Public key:");
    println!("  {}", hex::encode(ca.public_key_bytes()));
    Ok(())
}
