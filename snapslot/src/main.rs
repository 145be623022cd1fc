//! Snapslot - Main entry point
//!
//! Single-snapshot, deduplicated, encrypted backups over a restricted remote
//! command channel.

mod cli;
mod commands;

use anyhow::Result;
use clap::Parser;
use cli::{Cli, Command};
use snapslot_core::{utils, Config};
use std::path::Path;

/// Used when `--config` is not given and the file exists.
const DEFAULT_CONFIG_FILE: &str = "snapslot.toml";

#[tokio::main]
async fn main() {
    if let Err(err) = run().await {
        eprintln!("error: {err:#}");
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    // Environment overrides may live in a .env file next to the config
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

    // Load configuration
    let config = match &cli.config {
        Some(path) => Config::from_file(path)?,
        None if Path::new(DEFAULT_CONFIG_FILE).is_file() => {
            Config::from_file(Path::new(DEFAULT_CONFIG_FILE))?
        }
        None => Config::default(),
    };

    // Initialize logging
    let log_level = cli.log_level.as_deref().unwrap_or(&config.log.level);
    utils::logger::init(log_level)?;

    tracing::debug!("snapslot v{}", env!("CARGO_PKG_VERSION"));

    match cli.command {
        Command::Run(args) => commands::run::execute(&config, args).await,
        Command::Setup => commands::setup::execute(&config).await,
        Command::Inspect(args) => commands::inspect::execute(&config, args).await,
        Command::Lookup(args) => commands::lookup::execute(&config, args).await,
        Command::Fingerprint(args) => commands::fingerprint::execute(&config, args).await,
        Command::Download(args) => commands::download::execute(&config, args).await,
        Command::Quota => commands::quota::execute(&config).await,
        Command::Config => commands::show_config::execute(&config),
    }
}
