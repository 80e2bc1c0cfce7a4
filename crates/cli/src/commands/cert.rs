//! Certificate commands

use anyhow::{Context, bail};
use colored::Colorize;
use k256::PublicKey;
use phonon_card::CardCertificate;
use phonon_card::cert::DEMO_CA_PUBLIC_KEY;
use phonon_signer::LocalCaSigner;
use tracing::debug;

use super::CaKeyArgs;
use crate::utils::decode_hex;

fn load_ca(args: &CaKeyArgs) -> anyhow::Result<LocalCaSigner> {
    let ca = match (&args.ca_key, args.demo, args.mock) {
        (Some(key), _, _) => {
            let key = decode_hex(key).context("CA private key")?;
            LocalCaSigner::from_bytes(&key)?
        }
        (None, true, _) => LocalCaSigner::demo()?,
        (None, false, true) => LocalCaSigner::mock()?,
        (None, false, false) => bail!("pick a CA with --ca-key, --demo or --mock"),
    };
    Ok(ca)
}

/// Mint a certificate for a card identity key
pub fn create_cert_command(card_pubkey: &str, args: &CaKeyArgs) -> anyhow::Result<()> {
    let card_key = decode_hex(card_pubkey).context("card public key")?;
    let card_key =
        PublicKey::from_sec1_bytes(&card_key).context("card public key is not on secp256k1")?;
    let ca = load_ca(args)?;
    debug!(?ca, "signing certificate");

    let certificate = ca.certify(&card_key)?;
    let parsed = CardCertificate::parse(&certificate)?;

    println!("{}", "\u{1F4DC} Certificate created".green().bold());
    println!("{parsed}");
    println!("\n{}", hex::encode(&certificate));
    Ok(())
}

/// Validate a certificate against a CA public key
pub fn verify_cert_command(cert: &str, ca_pubkey: Option<&str>) -> anyhow::Result<()> {
    let raw = decode_hex(cert).context("certificate")?;
    let ca_key = match ca_pubkey {
        Some(hex) => decode_hex(hex).context("CA public key")?,
        None => DEMO_CA_PUBLIC_KEY.to_vec(),
    };

    let certificate = CardCertificate::parse(&raw).context("malformed certificate")?;
    println!("{certificate}");

    match certificate.validate(&ca_key) {
        Ok(()) => {
            println!("{}", "\u{2705} Certificate is valid".green().bold());
            Ok(())
        }
        Err(err) => {
            println!("{}", "\u{274C} Certificate is NOT valid".red().bold());
            Err(err).context("certificate validation failed")
        }
    }
}
