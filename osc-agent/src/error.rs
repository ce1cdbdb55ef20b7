//! Error types for the apply engine and the reconciliation driver.

use osc_core::ChangeError;
use osc_types::OscError;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

use crate::apply::Phase;
use crate::fs::FsError;
use crate::marker::MarkerError;
use crate::node::NodeStoreError;
use crate::source::SourceError;
use crate::systemd::ServiceManagerError;

/// A single failed sub-step of an apply phase.
#[derive(Debug, Error)]
pub enum StepError {
    /// A filesystem operation failed.
    #[error("{op} {}: {source}", .path.display())]
    Fs {
        /// What was being done.
        op: &'static str,
        /// Target path.
        path: PathBuf,
        /// Underlying error.
        source: FsError,
    },

    /// A service-manager call for a unit failed.
    #[error("{op} unit {unit:?}: {source}")]
    Unit {
        /// What was being done.
        op: &'static str,
        /// Target unit.
        unit: String,
        /// Underlying error.
        source: ServiceManagerError,
    },

    /// Reloading the service manager failed.
    #[error("daemon reload: {0}")]
    Reload(#[source] ServiceManagerError),
}

impl StepError {
    pub(crate) fn fs(op: &'static str, path: impl Into<PathBuf>, source: FsError) -> Self {
        Self::Fs {
            op,
            path: path.into(),
            source,
        }
    }

    pub(crate) fn unit(op: &'static str, unit: &str, source: ServiceManagerError) -> Self {
        Self::Unit {
            op,
            unit: unit.to_string(),
            source,
        }
    }
}

/// An apply phase failed; later phases did not run.
#[derive(Debug, Error)]
#[error("failed {phase}: {source}")]
pub struct ApplyError {
    /// The phase that failed.
    pub phase: Phase,
    /// The failed sub-step.
    #[source]
    pub source: StepError,
}

impl ApplyError {
    pub(crate) fn new(phase: Phase, source: StepError) -> Self {
        Self { phase, source }
    }
}

/// A reconciliation pass failed.
#[derive(Debug, Error)]
pub enum ReconcileError {
    /// The desired configuration could not be fetched.
    #[error("failed fetching desired config: {0}")]
    Fetch(#[from] SourceError),

    /// The node object could not be read.
    #[error("failed reading node {node:?}: {source}")]
    Node {
        /// Node name.
        node: String,
        /// Underlying error.
        source: NodeStoreError,
    },

    /// The desired configuration is malformed.
    #[error("invalid desired config: {0}")]
    InvalidConfig(#[source] OscError),

    /// The observed node state could not be read.
    #[error("failed observing node state: {0}")]
    Observe(#[source] FsError),

    /// The change set could not be computed.
    #[error("failed computing changes: {0}")]
    Changes(#[from] ChangeError),

    /// Applying the change set failed.
    #[error(transparent)]
    Apply(#[from] ApplyError),

    /// Reading or writing the last-applied marker failed.
    #[error(transparent)]
    Marker(#[from] MarkerError),

    /// The node object could not be annotated.
    #[error("failed annotating node {node:?}: {source}")]
    Annotate {
        /// Node name.
        node: String,
        /// Underlying error.
        source: NodeStoreError,
    },

    /// The pass exceeded the reconcile timeout.
    #[error("reconciliation timed out after {0:?}")]
    Timeout(Duration),
}

impl ReconcileError {
    /// True if the desired configuration itself must be fixed upstream.
    pub fn is_malformed_input(&self) -> bool {
        matches!(
            self,
            Self::InvalidConfig(_) | Self::Changes(ChangeError::InvalidContent(_))
        )
    }
}
