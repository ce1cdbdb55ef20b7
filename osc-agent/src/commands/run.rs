//! Run the reconciliation loop until interrupted.

use anyhow::{Context, Result};
use osc_agent::Config;
use tokio::sync::watch;

/// Run the run command.
pub async fn run(config: &Config) -> Result<()> {
    let reconciler = super::build_reconciler(config);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let signal = async {
        let result = tokio::signal::ctrl_c()
            .await
            .context("Failed to listen for shutdown signal");
        tracing::info!("Shutdown requested");
        let _ = shutdown_tx.send(true);
        result
    };

    let (_, signal) = tokio::join!(reconciler.run(shutdown_rx), signal);
    signal
}
