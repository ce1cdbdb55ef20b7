//! # osc-agent
//!
//! Node agent that converges a machine to a desired operating system config.
//!
//! This crate is the I/O shell around `osc-core`:
//! - Gathers the observed node state through a [`Filesystem`]
//! - Applies a [`ChangeSet`](osc_core::ChangeSet) in six ordered phases
//! - Talks to systemd through a [`ServiceManager`]
//! - Persists the last applied config and annotates the node object
//!
//! ## Architecture
//!
//! ```text
//! ConfigSource ──► Reconciler ──► gate ──► observe ──► compute_changes
//!                      │                                     │
//!                      │            ┌────────────────────────┘
//!                      ▼            ▼
//!                 NodeStore     Applier ──► Filesystem
//!                      ▲            │
//!                      │            └─────► ServiceManager (systemd)
//!                      └── MarkerStore (last-applied config)
//! ```
//!
//! All collaborators are traits, with in-memory implementations
//! ([`MemoryFilesystem`], [`MockServiceManager`], [`StaticSource`],
//! [`MemoryNodeStore`]) for tests.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod apply;
pub mod config;
pub mod error;
pub mod fs;
pub mod journal;
pub mod marker;
pub mod node;
pub mod observe;
pub mod reconciler;
pub mod source;
pub mod systemd;

pub use apply::{ApplyReport, ApplySettings, Applier, Phase};
pub use config::{Config, ConfigError};
pub use error::{ApplyError, ReconcileError, StepError};
pub use fs::{Filesystem, FsError, MemoryFilesystem, OsFilesystem};
pub use journal::{Effect, Journal};
pub use marker::{LastApplied, MarkerError, MarkerStore};
pub use node::{LocalNodeStore, MemoryNodeStore, Node, NodeStore, NodeStoreError};
pub use reconciler::{ReconcileOutcome, Reconciler, ANNOTATION_CHECKSUM, ANNOTATION_KUBERNETES_VERSION};
pub use source::{ConfigSource, FetchedConfig, FileSource, SourceError, StaticSource};
pub use systemd::{MockServiceManager, Operation, ServiceManager, ServiceManagerError, SystemctlManager};
