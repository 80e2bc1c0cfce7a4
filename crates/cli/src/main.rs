use clap::Parser;
use tracing_subscriber::EnvFilter;

mod commands;
mod utils;

use commands::{CaCommands, CertCommands, Commands, DemoCommands};

#[derive(Parser)]
#[command(version, about = "Phonon card certificates and mock card demos")]
struct Cli {
    /// Trace level output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("trace")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_ansi(true)
        .init();

    match cli.command {
        Commands::Ca {
            command: CaCommands::Generate,
        } => commands::generate_ca_command(),
        Commands::Cert {
            command: CertCommands::Create { card_pubkey, ca },
        } => commands::create_cert_command(&card_pubkey, &ca),
        Commands::Cert {
            command: CertCommands::Verify { cert, ca_pubkey },
        } => commands::verify_cert_command(&cert, ca_pubkey.as_deref()),
        Commands::Demo {
            command: DemoCommands::Pair { phonons, pin },
        } => commands::demo_pair_command(phonons, &pin),
    }
}
