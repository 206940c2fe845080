//! limitomo command-line entry point.

use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use limitomo_cli::{tomo, Cli, Commands};

fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Tomo(command) => tomo::execute(command)?,
        Commands::Version => {
            println!("limitomo {}", env!("CARGO_PKG_VERSION"));
            println!("  limitomo-core  {}", limitomo_core::VERSION);
            println!("  limitomo-gmm   {}", limitomo_gmm::VERSION);
            println!("  limitomo-recon {}", limitomo_recon::VERSION);
        }
    }
    Ok(())
}
