//! Run a single reconciliation pass.

use anyhow::Result;
use osc_agent::Config;

/// Run the once command.
pub async fn run(config: &Config) -> Result<()> {
    let reconciler = super::build_reconciler(config);
    let outcome = reconciler.reconcile().await?;

    match outcome.applied {
        Some(report) => tracing::info!(?report, requeue_after = ?outcome.requeue_after, "Pass finished"),
        None => tracing::info!(requeue_after = ?outcome.requeue_after, "Pass finished without changes"),
    }

    Ok(())
}
