mod registered_modules;

use anyhow::{Context, Result};
use baseplate_core::OsManager;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// BasePlate runtime - thin launcher over the module host core.
#[derive(Parser)]
#[command(name = "baseplate-runtime")]
#[command(about = "Boots the BasePlate module host core")]
#[command(version)]
struct Cli {
    /// Path to the YAML configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Log verbosity (-v info, -vv debug, -vvv trace).
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Boot the core and run until shutdown (default).
    Run,
    /// Resolve the registry and construct every module, then exit.
    Check,
}

fn init_logging(verbose: u8) {
    let default_level = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    if let Some(ref path) = cli.config {
        anyhow::ensure!(path.is_file(), "config file does not exist: {}", path.display());
    }

    let manager = OsManager::construct(cli.config.as_deref())
        .context("failed to construct the module host")?;

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Check => {
            tracing::info!("configuration and module registry resolved successfully");
        }
        Commands::Run => {
            manager.boot().await.context("boot failed")?;
            tracing::info!("BasePlate runtime booted, awaiting shutdown");
            manager.run().await;
            manager.shutdown().await;
            tracing::info!("BasePlate runtime shut down cleanly");
        }
    }

    Ok(())
}
