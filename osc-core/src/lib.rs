//! # osc-core
//!
//! Pure logic for the OSC node agent (no I/O, instant tests).
//!
//! This crate decides *what* has to happen to converge a node, without
//! touching the disk or the service manager.
//!
//! ## Design Philosophy
//!
//! All modules in this crate are **pure** - they take input and produce output
//! without side effects. This enables:
//! - Instant unit tests (no mocks, no async)
//! - Deterministic behavior (same input → same output)
//! - Easy reasoning about what a pass is going to do
//!
//! The actual I/O (reading the current disk state, writing files, talking to
//! systemd) is performed by `osc-agent`, which gathers an [`ObservedState`]
//! and interprets the [`ChangeSet`] computed here.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod changes;
pub mod gate;
pub mod observed;

pub use changes::{
    compute_changes, ChangeError, ChangeSet, ChangedFile, DropInChanges, FileChanges,
    UnitChange, UnitChanges,
};
pub use gate::{failure_backoff, should_skip, PassOutcome, RequeuePolicy};
pub use observed::{ObservedFile, ObservedState, ObservedUnit};
