//! # osc-agent
//!
//! Node agent converging files and systemd units to a desired operating
//! system config.
//!
//! ## Commands
//!
//! - `run`: Reconcile continuously until interrupted
//! - `once`: Run a single reconciliation pass
//! - `diff`: Print the pending changes without applying them
//! - `register`: Add this node to the local node store
//!
//! ## Example
//!
//! ```bash
//! # Show what the next pass would change
//! osc-agent --config /etc/osc-agent/agent.toml diff
//!
//! # Make the node known, then run the agent
//! osc-agent register
//! RUST_LOG=osc_agent=debug osc-agent run
//! ```

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use osc_agent::Config;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

mod commands;

/// Node agent for operating system configs.
#[derive(Parser, Debug)]
#[command(name = "osc-agent")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Path to the agent configuration file
    #[arg(long, short, global = true, default_value = "/etc/osc-agent/agent.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Reconcile continuously until interrupted
    Run,

    /// Run a single reconciliation pass
    Once,

    /// Print the pending changes without applying them
    Diff,

    /// Add this node to the local node store
    Register,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = load_config(&cli.config)?;

    match cli.command {
        Commands::Run => commands::run::run(&config).await?,
        Commands::Once => commands::once::run(&config).await?,
        Commands::Diff => commands::diff::run(&config).await?,
        Commands::Register => commands::register::run(&config).await?,
    }

    Ok(())
}

/// Load the configuration, falling back to defaults if the file is missing.
fn load_config(path: &std::path::Path) -> Result<Config> {
    match Config::from_file(path) {
        Ok(config) => Ok(config),
        Err(e) if e.is_not_found() => {
            tracing::warn!(path = %path.display(), "Config file not found, using defaults");
            Ok(Config::default())
        }
        Err(e) => Err(e).context("Failed to load configuration"),
    }
}
