//! Mock service manager for testing.
//!
//! Records every call in a [`Journal`] and allows forcing failures per
//! operation and unit.

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use super::{Operation, ServiceManager, ServiceManagerError};
use crate::journal::{Effect, Journal};

/// Mock service manager for testing.
///
/// Calls are recorded when they complete, so a delayed unit shows up after
/// faster siblings.
#[derive(Debug, Clone, Default)]
pub struct MockServiceManager {
    inner: Arc<Mutex<MockServiceManagerInner>>,
    journal: Journal,
}

#[derive(Debug, Default)]
struct MockServiceManagerInner {
    fail_next: HashMap<(Operation, String), String>,
    unknown_units: HashSet<String>,
    delays: HashMap<String, Duration>,
    in_flight: usize,
    max_in_flight: usize,
}

impl MockServiceManager {
    /// Create a new mock service manager.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record calls into a shared journal.
    pub fn with_journal(mut self, journal: Journal) -> Self {
        self.journal = journal;
        self
    }

    /// All recorded calls, in completion order.
    pub fn calls(&self) -> Vec<Effect> {
        self.journal
            .entries()
            .into_iter()
            .filter(Effect::is_service_call)
            .collect()
    }

    /// Cause the next `operation` on `unit` to fail with the given error.
    ///
    /// Use an empty unit name for [`Operation::DaemonReload`].
    pub fn fail_next(&self, operation: Operation, unit: &str, error: &str) {
        self.lock()
            .fail_next
            .insert((operation, unit.to_string()), error.to_string());
    }

    /// Report `unit` as unknown to disable and stop calls.
    pub fn forget_unit(&self, unit: &str) {
        self.lock().unknown_units.insert(unit.to_string());
    }

    /// Delay stop and restart of `unit`.
    pub fn delay_unit(&self, unit: &str, delay: Duration) {
        self.lock().delays.insert(unit.to_string(), delay);
    }

    /// Highest number of stop/restart calls that were running at once.
    pub fn max_in_flight(&self) -> usize {
        self.lock().max_in_flight
    }

    fn lock(&self) -> MutexGuard<'_, MockServiceManagerInner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn check(&self, operation: Operation, unit: &str) -> Result<(), ServiceManagerError> {
        let mut inner = self.lock();

        // Check for forced failure
        if let Some(reason) = inner.fail_next.remove(&(operation, unit.to_string())) {
            return Err(ServiceManagerError::Failed {
                operation,
                target: (if unit.is_empty() { "daemon" } else { unit }).to_string(),
                reason,
            });
        }

        if matches!(operation, Operation::Disable | Operation::Stop)
            && inner.unknown_units.contains(unit)
        {
            return Err(ServiceManagerError::UnitNotFound {
                operation,
                unit: unit.to_string(),
            });
        }

        Ok(())
    }

    async fn control(&self, operation: Operation, unit: &str) -> Result<(), ServiceManagerError> {
        let delay = {
            let mut inner = self.lock();
            inner.in_flight += 1;
            inner.max_in_flight = inner.max_in_flight.max(inner.in_flight);
            inner.delays.get(unit).copied()
        };

        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let result = self.check(operation, unit);
        self.lock().in_flight -= 1;
        result?;

        self.journal.record(match operation {
            Operation::Stop => Effect::Stop(unit.to_string()),
            _ => Effect::Restart(unit.to_string()),
        });
        Ok(())
    }
}

#[async_trait]
impl ServiceManager for MockServiceManager {
    async fn enable(&self, unit: &str) -> Result<(), ServiceManagerError> {
        self.check(Operation::Enable, unit)?;
        self.journal.record(Effect::Enable(unit.to_string()));
        Ok(())
    }

    async fn disable(&self, unit: &str) -> Result<(), ServiceManagerError> {
        self.check(Operation::Disable, unit)?;
        self.journal.record(Effect::Disable(unit.to_string()));
        Ok(())
    }

    async fn stop(&self, unit: &str) -> Result<(), ServiceManagerError> {
        self.control(Operation::Stop, unit).await
    }

    async fn restart(&self, unit: &str) -> Result<(), ServiceManagerError> {
        self.control(Operation::Restart, unit).await
    }

    async fn daemon_reload(&self) -> Result<(), ServiceManagerError> {
        self.check(Operation::DaemonReload, "")?;
        self.journal.record(Effect::DaemonReload);
        Ok(())
    }
}
