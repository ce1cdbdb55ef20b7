//! Configuration loading for osc-agent.
//!
//! Configuration is loaded from a TOML file (default: `/etc/osc-agent/agent.toml`).
//! Every section and field is optional.

use osc_core::RequeuePolicy;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::apply::{ApplySettings, DEFAULT_MAX_PARALLEL_UNIT_COMMANDS, DEFAULT_SCRATCH_DIR, DEFAULT_UNIT_DIR};
use crate::marker::DEFAULT_MARKER_PATH;

/// Root configuration for osc-agent.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Node identity.
    pub agent: AgentConfig,
    /// Desired-config source.
    pub source: SourceConfig,
    /// Filesystem locations.
    pub paths: PathsConfig,
    /// Reconciliation timing and limits.
    pub reconcile: ReconcileConfig,
}

/// Node identity.
#[derive(Debug, Clone, Deserialize)]
pub struct AgentConfig {
    /// Name of the node object to annotate (default: `$NODE_NAME`, then `$HOSTNAME`).
    #[serde(default = "default_node_name")]
    pub node_name: String,
    /// Kubernetes version recorded on the node after a successful apply.
    pub kubernetes_version: Option<String>,
}

/// Desired-config source.
#[derive(Debug, Clone, Deserialize)]
pub struct SourceConfig {
    /// File holding the desired config (default: /var/lib/osc-agent/osc.json).
    /// A sidecar `<path>.sha256` may declare its checksum.
    #[serde(default = "default_source_path")]
    pub path: PathBuf,
}

/// Filesystem locations.
#[derive(Debug, Clone, Deserialize)]
pub struct PathsConfig {
    /// Root all managed paths are resolved under (default: none, the real `/`).
    pub root: Option<PathBuf>,
    /// systemd unit directory (default: /etc/systemd/system).
    #[serde(default = "default_unit_dir")]
    pub unit_dir: PathBuf,
    /// Parent of the per-pass scratch directory (default: /var/lib/osc-agent/tmp).
    #[serde(default = "default_scratch_dir")]
    pub scratch_dir: PathBuf,
    /// Last-applied marker (default: /var/lib/osc-agent/last-applied-osc.json).
    #[serde(default = "default_marker_path")]
    pub marker_path: PathBuf,
    /// JSON file holding node objects (default: /var/lib/osc-agent/nodes.json).
    #[serde(default = "default_node_store")]
    pub node_store: PathBuf,
}

/// Reconciliation timing and limits.
#[derive(Debug, Clone, Deserialize)]
pub struct ReconcileConfig {
    /// Interval between passes once converged, in seconds (default: 60).
    #[serde(default = "default_sync_period_secs")]
    pub sync_period_secs: u64,
    /// Upper bound for a single pass, in seconds (default: 180).
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Retry interval while the node object is not registered, in seconds (default: 5).
    #[serde(default = "default_node_missing_retry_secs")]
    pub node_missing_retry_secs: u64,
    /// Concurrent unit stop/restart calls (default: 10).
    #[serde(default = "default_max_parallel_unit_commands")]
    pub max_parallel_unit_commands: usize,
}

// Default value functions
fn default_node_name() -> String {
    std::env::var("NODE_NAME")
        .or_else(|_| std::env::var("HOSTNAME"))
        .unwrap_or_else(|_| "localhost".to_string())
}

fn default_source_path() -> PathBuf {
    PathBuf::from("/var/lib/osc-agent/osc.json")
}

fn default_unit_dir() -> PathBuf {
    PathBuf::from(DEFAULT_UNIT_DIR)
}

fn default_scratch_dir() -> PathBuf {
    PathBuf::from(DEFAULT_SCRATCH_DIR)
}

fn default_marker_path() -> PathBuf {
    PathBuf::from(DEFAULT_MARKER_PATH)
}

fn default_node_store() -> PathBuf {
    PathBuf::from("/var/lib/osc-agent/nodes.json")
}

fn default_sync_period_secs() -> u64 {
    60
}

fn default_timeout_secs() -> u64 {
    180 // 3 minutes
}

fn default_node_missing_retry_secs() -> u64 {
    5
}

fn default_max_parallel_unit_commands() -> usize {
    DEFAULT_MAX_PARALLEL_UNIT_COMMANDS
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            node_name: default_node_name(),
            kubernetes_version: None,
        }
    }
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            path: default_source_path(),
        }
    }
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            root: None,
            unit_dir: default_unit_dir(),
            scratch_dir: default_scratch_dir(),
            marker_path: default_marker_path(),
            node_store: default_node_store(),
        }
    }
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            sync_period_secs: default_sync_period_secs(),
            timeout_secs: default_timeout_secs(),
            node_missing_retry_secs: default_node_missing_retry_secs(),
            max_parallel_unit_commands: default_max_parallel_unit_commands(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            source: e,
        })?;

        toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            source: e,
        })
    }

    /// Interval between passes once converged.
    pub fn sync_period(&self) -> Duration {
        Duration::from_secs(self.reconcile.sync_period_secs)
    }

    /// Upper bound for a single pass.
    pub fn reconcile_timeout(&self) -> Duration {
        Duration::from_secs(self.reconcile.timeout_secs)
    }

    /// Scheduling of the next pass after a successful one.
    pub fn requeue_policy(&self) -> RequeuePolicy {
        RequeuePolicy {
            sync_period: self.sync_period(),
            node_missing_retry: Duration::from_secs(self.reconcile.node_missing_retry_secs),
        }
    }

    /// Settings for the apply engine.
    pub fn apply_settings(&self) -> ApplySettings {
        ApplySettings {
            unit_dir: self.paths.unit_dir.clone(),
            scratch_dir: self.paths.scratch_dir.clone(),
            max_parallel_unit_commands: self.reconcile.max_parallel_unit_commands,
        }
    }
}

/// Configuration error types.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read configuration file.
    #[error("failed to read config file {path}: {source}")]
    ReadError {
        /// Path to the configuration file.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },
    /// Failed to parse configuration file.
    #[error("failed to parse config file {path}: {source}")]
    ParseError {
        /// Path to the configuration file.
        path: PathBuf,
        /// Underlying TOML parse error.
        source: toml::de::Error,
    },
}

impl ConfigError {
    /// True if the configuration file does not exist.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::ReadError { source, .. } if source.kind() == std::io::ErrorKind::NotFound)
    }
}
