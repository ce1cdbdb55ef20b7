//! Ordered record of side effects.
//!
//! [`MemoryFilesystem`](crate::MemoryFilesystem) and
//! [`MockServiceManager`](crate::MockServiceManager) append to a journal.
//! Sharing one journal between both lets tests check the order in which a
//! pass touched disk and systemd.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};

/// A single side effect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    /// Directory created (including parents).
    CreateDir(PathBuf),
    /// File written.
    Write(PathBuf),
    /// File renamed.
    Rename {
        /// Source path.
        from: PathBuf,
        /// Target path.
        to: PathBuf,
    },
    /// Permission bits set.
    Chmod(PathBuf, u32),
    /// File removed.
    Remove(PathBuf),
    /// Directory tree removed.
    RemoveAll(PathBuf),
    /// Unit enabled.
    Enable(String),
    /// Unit disabled.
    Disable(String),
    /// Unit stopped.
    Stop(String),
    /// Unit restarted.
    Restart(String),
    /// Service manager reloaded.
    DaemonReload,
}

impl Effect {
    /// True for effects issued to the service manager.
    pub fn is_service_call(&self) -> bool {
        matches!(
            self,
            Self::Enable(_) | Self::Disable(_) | Self::Stop(_) | Self::Restart(_) | Self::DaemonReload
        )
    }
}

/// Shared, append-only list of [`Effect`]s. Clones share state.
#[derive(Debug, Clone, Default)]
pub struct Journal {
    entries: Arc<Mutex<Vec<Effect>>>,
}

impl Journal {
    /// Create an empty journal.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an effect.
    pub fn record(&self, effect: Effect) {
        self.lock().push(effect);
    }

    /// Snapshot of all effects in order.
    pub fn entries(&self) -> Vec<Effect> {
        self.lock().clone()
    }

    /// Index of the first effect equal to `effect`.
    pub fn position(&self, effect: &Effect) -> Option<usize> {
        self.lock().iter().position(|e| e == effect)
    }

    /// Number of recorded effects.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// True if nothing was recorded.
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Forget all effects.
    pub fn clear(&self) {
        self.lock().clear();
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<Effect>> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clones_share_entries() {
        let journal = Journal::new();
        let other = journal.clone();

        journal.record(Effect::DaemonReload);
        other.record(Effect::Stop("a.service".into()));

        assert_eq!(journal.len(), 2);
        assert_eq!(journal.position(&Effect::Stop("a.service".into())), Some(1));
        assert!(journal.entries()[0].is_service_call());
    }

    #[test]
    fn clear_empties_journal() {
        let journal = Journal::new();
        journal.record(Effect::Write(PathBuf::from("/etc/a")));
        assert!(!journal.entries()[0].is_service_call());

        journal.clear();
        assert!(journal.is_empty());
    }
}
