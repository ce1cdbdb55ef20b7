//! Service manager backed by the `systemctl` command.

use async_trait::async_trait;
use std::path::PathBuf;
use tokio::process::Command;

use super::{Operation, ServiceManager, ServiceManagerError};

/// stderr fragments systemctl prints for units it does not know.
const NOT_FOUND_MARKERS: &[&str] = &["not loaded", "does not exist", "not found"];

/// Drives systemd by invoking `systemctl`.
#[derive(Debug, Clone)]
pub struct SystemctlManager {
    binary: PathBuf,
}

impl Default for SystemctlManager {
    fn default() -> Self {
        Self::new()
    }
}

impl SystemctlManager {
    /// Use `systemctl` from `PATH`.
    pub fn new() -> Self {
        Self::with_binary("systemctl")
    }

    /// Use a specific `systemctl` binary.
    pub fn with_binary(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    async fn run(&self, operation: Operation, unit: Option<&str>) -> Result<(), ServiceManagerError> {
        let mut command = Command::new(&self.binary);
        command.arg(operation.verb());
        if let Some(unit) = unit {
            command.arg(unit);
        }

        tracing::debug!(operation = %operation, unit = unit.unwrap_or_default(), "Invoking systemctl");
        let output = command
            .output()
            .await
            .map_err(ServiceManagerError::Unavailable)?;

        if output.status.success() {
            return Ok(());
        }

        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        Err(classify_failure(operation, unit, output.status.code(), stderr))
    }
}

fn classify_failure(
    operation: Operation,
    unit: Option<&str>,
    code: Option<i32>,
    stderr: String,
) -> ServiceManagerError {
    if let Some(unit) = unit {
        let lower = stderr.to_lowercase();
        if NOT_FOUND_MARKERS.iter().any(|m| lower.contains(m)) {
            return ServiceManagerError::UnitNotFound {
                operation,
                unit: unit.to_string(),
            };
        }
    }

    let status = code.map_or_else(|| "killed by signal".to_string(), |c| format!("exit status {c}"));
    let reason = if stderr.is_empty() {
        status
    } else {
        format!("{status}: {stderr}")
    };

    ServiceManagerError::Failed {
        operation,
        target: unit.unwrap_or("daemon").to_string(),
        reason,
    }
}

#[async_trait]
impl ServiceManager for SystemctlManager {
    async fn enable(&self, unit: &str) -> Result<(), ServiceManagerError> {
        self.run(Operation::Enable, Some(unit)).await
    }

    async fn disable(&self, unit: &str) -> Result<(), ServiceManagerError> {
        self.run(Operation::Disable, Some(unit)).await
    }

    async fn stop(&self, unit: &str) -> Result<(), ServiceManagerError> {
        self.run(Operation::Stop, Some(unit)).await
    }

    async fn restart(&self, unit: &str) -> Result<(), ServiceManagerError> {
        self.run(Operation::Restart, Some(unit)).await
    }

    async fn daemon_reload(&self) -> Result<(), ServiceManagerError> {
        self.run(Operation::DaemonReload, None).await
    }
}
