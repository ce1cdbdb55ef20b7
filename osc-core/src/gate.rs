//! Convergence gate and requeue policy.
//!
//! The gate compares the checksum recorded on the node object with the
//! checksum of the desired configuration. The checksum covers the encoded
//! bytes, not the semantics, so any byte-level change forces a pass.

use osc_types::Checksum;
use std::time::Duration;

/// Returns true when the node already carries the desired checksum.
///
/// A node without an annotation is never considered converged.
pub fn should_skip(annotation: Option<&str>, desired: &Checksum) -> bool {
    annotation == Some(desired.as_str())
}

/// How a successful reconciliation pass ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PassOutcome {
    /// The desired-config resource does not exist.
    SourceAbsent,
    /// The node already carried the desired checksum.
    Converged,
    /// Changes were applied and the marker persisted.
    Applied {
        /// Whether the node object exists and received the annotation.
        node_present: bool,
    },
}

/// Scheduling of the next pass after a successful one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequeuePolicy {
    /// Regular resync interval.
    pub sync_period: Duration,
    /// Retry interval while the node object is not registered yet.
    pub node_missing_retry: Duration,
}

impl Default for RequeuePolicy {
    fn default() -> Self {
        Self {
            sync_period: Duration::from_secs(60),
            node_missing_retry: Duration::from_secs(5),
        }
    }
}

impl RequeuePolicy {
    /// Delay before the next pass, `None` to wait for an external trigger.
    pub fn requeue_after(&self, outcome: PassOutcome) -> Option<Duration> {
        match outcome {
            PassOutcome::SourceAbsent => None,
            PassOutcome::Converged => Some(self.sync_period),
            PassOutcome::Applied { node_present: true } => Some(self.sync_period),
            PassOutcome::Applied {
                node_present: false,
            } => Some(self.node_missing_retry),
        }
    }
}

/// Delay before retrying after `attempt` consecutive failed passes.
///
/// Formula: min(cap, 2^(attempt-1) seconds), with attempt 0 treated as 1.
pub fn failure_backoff(attempt: u32, cap: Duration) -> Duration {
    let exponent = attempt.saturating_sub(1).min(16);
    Duration::from_secs(1u64 << exponent).min(cap)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical_checksum_skips() {
        let checksum = Checksum::of(b"config");
        assert!(should_skip(Some(checksum.as_str()), &checksum));
    }

    #[test]
    fn any_byte_difference_does_not_skip() {
        let applied = Checksum::of(b"config-a");
        let desired = Checksum::of(b"config-b");
        assert!(!should_skip(Some(applied.as_str()), &desired));
    }

    #[test]
    fn missing_annotation_does_not_skip() {
        assert!(!should_skip(None, &Checksum::of(b"config")));
        assert!(!should_skip(Some(""), &Checksum::of(b"config")));
    }

    #[test]
    fn requeue_follows_outcome() {
        let policy = RequeuePolicy::default();

        assert_eq!(policy.requeue_after(PassOutcome::SourceAbsent), None);
        assert_eq!(
            policy.requeue_after(PassOutcome::Converged),
            Some(Duration::from_secs(60))
        );
        assert_eq!(
            policy.requeue_after(PassOutcome::Applied { node_present: true }),
            Some(Duration::from_secs(60))
        );
        assert_eq!(
            policy.requeue_after(PassOutcome::Applied {
                node_present: false
            }),
            Some(Duration::from_secs(5))
        );
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let cap = Duration::from_secs(30);
        assert_eq!(failure_backoff(0, cap), Duration::from_secs(1));
        assert_eq!(failure_backoff(1, cap), Duration::from_secs(1));
        assert_eq!(failure_backoff(2, cap), Duration::from_secs(2));
        assert_eq!(failure_backoff(4, cap), Duration::from_secs(8));
        assert_eq!(failure_backoff(6, cap), cap);
        assert_eq!(failure_backoff(u32::MAX, cap), cap);
    }
}
