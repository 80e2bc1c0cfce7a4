use clap::{Args, Subcommand};

mod ca;
mod cert;
mod demo;

pub use ca::*;
pub use cert::*;
pub use demo::*;

/// Top level subcommands
#[derive(Subcommand)]
pub enum Commands {
    /// Certificate authority keys
    Ca {
        #[command(subcommand)]
        command: CaCommands,
    },

    /// Mint and check card certificates
    Cert {
        #[command(subcommand)]
        command: CertCommands,
    },

    /// Run protocol flows against in-memory cards
    Demo {
        #[command(subcommand)]
        command: DemoCommands,
    },
}

#[derive(Subcommand)]
pub enum CaCommands {
    /// Generate a fresh CA key pair
    Generate,
}

/// Which CA signs a new certificate
#[derive(Args, Debug, Clone)]
#[group(required = true, multiple = false)]
pub struct CaKeyArgs {
    /// CA private key in hex
    #[arg(long)]
    pub ca_key: Option<String>,

    /// Sign with the demo CA
    #[arg(long)]
    pub demo: bool,

    /// Sign with the CA behind mock cards
    #[arg(long)]
    pub mock: bool,
}

#[derive(Subcommand)]
pub enum CertCommands {
    /// Create a certificate for a card identity key
    Create {
        /// Card public key in hex (SEC1, compressed or not)
        #[arg(long, required = true)]
        card_pubkey: String,

        #[command(flatten)]
        ca: CaKeyArgs,
    },

    /// Validate a certificate against a CA
    Verify {
        /// Certificate in hex
        #[arg(long, required = true)]
        cert: String,

        /// CA public key in hex (default is the demo CA)
        #[arg(long)]
        ca_pubkey: Option<String>,
    },
}

#[derive(Subcommand)]
pub enum DemoCommands {
    /// Pair two mock cards and move phonons between them
    Pair {
        /// Number of phonons to mint and send (at most one mock card table)
        #[arg(long, default_value_t = 3, value_parser = clap::value_parser!(u16).range(1..=64))]
        phonons: u16,

        /// PIN set on both cards
        #[arg(long, default_value = "111111")]
        pin: String,
    },
}
