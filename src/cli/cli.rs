use crate::runtime;
use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "logtail-hub",
    version,
    about = "Tails a filesystem subtree and streams appended lines to subscribed clients"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the broker
    Run {
        #[arg(short, long, default_value = "/etc/logtail-hub.toml")]
        config: PathBuf,
    },

    /// Validate a configuration file without starting the broker
    Validate {
        #[arg(short, long, default_value = "/etc/logtail-hub.toml")]
        config: PathBuf,
    },

    /// Display version information
    Version,
}

/// Entry function for CLI
pub async fn run() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run { config } => runtime::runtime::run(config).await?,
        Commands::Validate { config } => validate_config(config)?,
        Commands::Version => show_version(),
    }

    Ok(())
}

/// Validate configuration file
fn validate_config(config: PathBuf) -> Result<()> {
    println!("Validating configuration file: {:?}", config);
    let cfg = crate::helpers::load_config::Config::load(&config)?;
    println!("Configuration valid:\n{:#?}", cfg);
    Ok(())
}

/// Show version information
fn show_version() {
    println!("logtail-hub {}", env!("CARGO_PKG_VERSION"));
}
