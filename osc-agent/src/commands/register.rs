//! Register this node in the local node store.

use anyhow::{Context, Result};
use osc_agent::{Config, LocalNodeStore};

/// Run the register command.
pub async fn run(config: &Config) -> Result<()> {
    let store = LocalNodeStore::new(&config.paths.node_store);
    store
        .register(&config.agent.node_name)
        .await
        .context("Failed to register node")?;

    println!(
        "Node {} registered in {}",
        config.agent.node_name,
        config.paths.node_store.display()
    );
    Ok(())
}
