//! CLI command implementations.

pub mod diff;
pub mod once;
pub mod register;
pub mod run;

use osc_agent::{Config, FileSource, Filesystem, LocalNodeStore, OsFilesystem, Reconciler, SystemctlManager};
use std::sync::Arc;

/// Wire the production collaborators into a reconciler.
pub fn build_reconciler(config: &Config) -> Reconciler {
    let fs: Arc<dyn Filesystem> = match &config.paths.root {
        Some(root) => Arc::new(OsFilesystem::rooted(root)),
        None => Arc::new(OsFilesystem::new()),
    };

    Reconciler::new(
        config,
        fs,
        Arc::new(SystemctlManager::new()),
        Arc::new(FileSource::new(&config.source.path)),
        Arc::new(LocalNodeStore::new(&config.paths.node_store)),
    )
}
