//! Service-manager abstraction for the OSC agent.
//!
//! This module provides a pluggable client for the node's service manager
//! (systemd via `systemctl`, mock for testing).
//!
//! # Design
//!
//! Every call is synchronous from the caller's perspective and may fail:
//! - `enable()` / `disable()` register or unregister a unit
//! - `stop()` / `restart()` control a unit
//! - `daemon_reload()` makes systemd re-read all unit files
//!
//! Failed calls are not retried here; the next reconciliation pass retries.

mod mock;
mod systemctl;

pub use mock::MockServiceManager;
pub use systemctl::SystemctlManager;

use async_trait::async_trait;
use std::fmt;
use thiserror::Error;

/// A service-manager operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    /// Enable a unit.
    Enable,
    /// Disable a unit.
    Disable,
    /// Stop a unit.
    Stop,
    /// Restart a unit.
    Restart,
    /// Reload all unit files.
    DaemonReload,
}

impl Operation {
    /// The `systemctl` verb for this operation.
    pub fn verb(self) -> &'static str {
        match self {
            Self::Enable => "enable",
            Self::Disable => "disable",
            Self::Stop => "stop",
            Self::Restart => "restart",
            Self::DaemonReload => "daemon-reload",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.verb())
    }
}

/// Service-manager errors.
#[derive(Debug, Error)]
pub enum ServiceManagerError {
    /// The unit is not known to the service manager.
    #[error("{operation} {unit}: unit not found")]
    UnitNotFound {
        /// The attempted operation.
        operation: Operation,
        /// The unit name.
        unit: String,
    },

    /// The operation was rejected or failed.
    #[error("{operation} {target} failed: {reason}")]
    Failed {
        /// The attempted operation.
        operation: Operation,
        /// Unit name, or `daemon` for reloads.
        target: String,
        /// Failure details.
        reason: String,
    },

    /// The service manager could not be reached.
    #[error("unable to invoke service manager: {0}")]
    Unavailable(#[source] std::io::Error),
}

impl ServiceManagerError {
    /// True if the unit does not exist.
    pub fn is_unit_not_found(&self) -> bool {
        matches!(self, Self::UnitNotFound { .. })
    }
}

/// Client for the node's service manager.
///
/// Implementations handle the underlying IPC mechanism
/// (`systemctl`, D-Bus, mock, etc).
#[async_trait]
pub trait ServiceManager: Send + Sync {
    /// Enable a unit so it starts on boot.
    async fn enable(&self, unit: &str) -> Result<(), ServiceManagerError>;

    /// Disable a unit.
    async fn disable(&self, unit: &str) -> Result<(), ServiceManagerError>;

    /// Stop a unit and wait for the job to finish.
    async fn stop(&self, unit: &str) -> Result<(), ServiceManagerError>;

    /// Restart (or start) a unit and wait for the job to finish.
    async fn restart(&self, unit: &str) -> Result<(), ServiceManagerError>;

    /// Reload unit files.
    async fn daemon_reload(&self) -> Result<(), ServiceManagerError>;
}
