//! Reconciliation driver.
//!
//! One pass fetches the desired configuration, consults the convergence
//! gate, computes and applies the changes, persists the marker and finally
//! annotates the node object. The node is never marked converged unless
//! every earlier step succeeded.

use osc_core::{compute_changes, failure_backoff, should_skip, ChangeSet, PassOutcome, RequeuePolicy};
use osc_types::{Checksum, OperatingSystemConfig};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

use crate::apply::{Applier, ApplyReport, ApplySettings};
use crate::config::Config;
use crate::error::ReconcileError;
use crate::fs::Filesystem;
use crate::marker::{LastApplied, MarkerStore};
use crate::node::{NodeStore, NodeStoreError};
use crate::observe::observe;
use crate::source::ConfigSource;
use crate::systemd::ServiceManager;

/// Node annotation holding the checksum of the applied configuration.
pub const ANNOTATION_CHECKSUM: &str = "checksum/cloud-config-data";

/// Node annotation holding the Kubernetes version the config was applied for.
pub const ANNOTATION_KUBERNETES_VERSION: &str = "worker.gardener.cloud/kubernetes-version";

/// Result of a successful pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileOutcome {
    /// Delay before the next pass, `None` to wait for an external trigger.
    pub requeue_after: Option<Duration>,
    /// What was applied, `None` if the pass stopped before applying.
    pub applied: Option<ApplyReport>,
}

/// Drives reconciliation passes for one node.
pub struct Reconciler {
    node_name: String,
    kubernetes_version: Option<String>,
    fs: Arc<dyn Filesystem>,
    systemd: Arc<dyn ServiceManager>,
    source: Arc<dyn ConfigSource>,
    nodes: Arc<dyn NodeStore>,
    marker: MarkerStore,
    settings: ApplySettings,
    policy: RequeuePolicy,
    timeout: Duration,
}

impl Reconciler {
    /// Create a reconciler from configuration and its collaborators.
    pub fn new(
        config: &Config,
        fs: Arc<dyn Filesystem>,
        systemd: Arc<dyn ServiceManager>,
        source: Arc<dyn ConfigSource>,
        nodes: Arc<dyn NodeStore>,
    ) -> Self {
        Self {
            node_name: config.agent.node_name.clone(),
            kubernetes_version: config.agent.kubernetes_version.clone(),
            fs,
            systemd,
            source,
            nodes,
            marker: MarkerStore::new(&config.paths.marker_path),
            settings: config.apply_settings(),
            policy: config.requeue_policy(),
            timeout: config.reconcile_timeout(),
        }
    }

    /// Run a single pass bounded by the reconcile timeout.
    ///
    /// A timed-out pass is abandoned mid-phase; the next pass repeats it.
    pub async fn reconcile(&self) -> Result<ReconcileOutcome, ReconcileError> {
        match tokio::time::timeout(self.timeout, self.reconcile_pass()).await {
            Ok(result) => result,
            Err(_) => Err(ReconcileError::Timeout(self.timeout)),
        }
    }

    fn outcome(&self, outcome: PassOutcome, applied: Option<ApplyReport>) -> ReconcileOutcome {
        ReconcileOutcome {
            requeue_after: self.policy.requeue_after(outcome),
            applied,
        }
    }

    async fn reconcile_pass(&self) -> Result<ReconcileOutcome, ReconcileError> {
        let Some(fetched) = self.source.fetch().await? else {
            tracing::debug!("Desired config is gone, nothing to reconcile");
            return Ok(self.outcome(PassOutcome::SourceAbsent, None));
        };

        let node = self
            .nodes
            .get(&self.node_name)
            .await
            .map_err(|source| ReconcileError::Node {
                node: self.node_name.clone(),
                source,
            })?;

        let desired =
            OperatingSystemConfig::from_slice(&fetched.raw).map_err(ReconcileError::InvalidConfig)?;

        let recorded = node.as_ref().and_then(|n| n.annotation(ANNOTATION_CHECKSUM));
        if should_skip(recorded, &fetched.checksum) {
            tracing::info!(checksum = %fetched.checksum, "Configuration on this node is up to date, nothing to be done");
            return Ok(self.outcome(PassOutcome::Converged, None));
        }

        let last_applied = self.marker.load(self.fs.as_ref()).await?;
        let changes = self.plan(&desired, last_applied.as_ref()).await?;

        tracing::info!(
            checksum = %fetched.checksum,
            changed_files = changes.files.changed.len(),
            deleted_files = changes.files.deleted.len(),
            changed_units = changes.units.changed.len(),
            deleted_units = changes.units.deleted.len(),
            "Applying operating system config"
        );
        let report = Applier::new(self.fs.as_ref(), self.systemd.as_ref(), &self.settings)
            .apply(&changes)
            .await?;
        tracing::info!(?report, "Successfully applied operating system config");

        let unchanged = last_applied.as_ref().is_some_and(|last| {
            last.raw == fetched.raw && last.checksum.as_ref() == Some(&fetched.checksum)
        });
        if !unchanged {
            self.marker
                .persist(self.fs.as_ref(), &fetched.raw, &fetched.checksum)
                .await?;
        }

        let node_present = match node {
            Some(_) => self.annotate(&fetched.checksum).await?,
            None => false,
        };
        if !node_present {
            tracing::info!(node = %self.node_name, "Waiting for node to get registered, requeuing");
        }

        Ok(self.outcome(PassOutcome::Applied { node_present }, Some(report)))
    }

    /// Returns false if the node disappeared in the meantime.
    async fn annotate(&self, checksum: &Checksum) -> Result<bool, ReconcileError> {
        let mut annotations = BTreeMap::from([(
            ANNOTATION_CHECKSUM.to_string(),
            checksum.as_str().to_string(),
        )]);
        if let Some(version) = &self.kubernetes_version {
            annotations.insert(ANNOTATION_KUBERNETES_VERSION.to_string(), version.clone());
        }

        match self.nodes.annotate(&self.node_name, &annotations).await {
            Ok(()) => {
                tracing::info!(node = %self.node_name, checksum = %checksum, "Annotated node");
                Ok(true)
            }
            Err(NodeStoreError::NotFound(_)) => Ok(false),
            Err(source) => Err(ReconcileError::Annotate {
                node: self.node_name.clone(),
                source,
            }),
        }
    }

    async fn plan(
        &self,
        desired: &OperatingSystemConfig,
        last_applied: Option<&LastApplied>,
    ) -> Result<ChangeSet, ReconcileError> {
        let previous = last_applied.map(|last| last.config.clone());
        let observed = observe(self.fs.as_ref(), &self.settings.unit_dir, desired, previous)
            .await
            .map_err(ReconcileError::Observe)?;
        Ok(compute_changes(&observed, desired)?)
    }

    /// Compute the changes a pass would apply, ignoring the convergence gate.
    ///
    /// Returns `None` if the desired configuration does not exist.
    pub async fn diff(&self) -> Result<Option<ChangeSet>, ReconcileError> {
        let Some(fetched) = self.source.fetch().await? else {
            return Ok(None);
        };
        let desired =
            OperatingSystemConfig::from_slice(&fetched.raw).map_err(ReconcileError::InvalidConfig)?;
        let last_applied = self.marker.load(self.fs.as_ref()).await?;

        self.plan(&desired, last_applied.as_ref()).await.map(Some)
    }

    /// Run passes until `shutdown` turns true or its sender is dropped.
    ///
    /// Successful passes are followed by their requeue delay, the sync
    /// period when none is set. Failed passes back off exponentially up to
    /// the sync period.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        tracing::info!(node = %self.node_name, sync_period = ?self.policy.sync_period, "Reconciler started");
        let mut failures = 0u32;

        while !*shutdown.borrow() {
            let delay = match self.reconcile().await {
                Ok(outcome) => {
                    failures = 0;
                    outcome.requeue_after.unwrap_or(self.policy.sync_period)
                }
                Err(e) => {
                    failures = failures.saturating_add(1);
                    let delay = failure_backoff(failures, self.policy.sync_period);
                    if e.is_malformed_input() {
                        tracing::error!(error = %e, "Desired config is invalid, waiting for a corrected one");
                    } else {
                        tracing::error!(error = %e, attempt = failures, retry_in = ?delay, "Reconciliation failed");
                    }
                    delay
                }
            };

            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }

        tracing::info!("Reconciler stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::MemoryFilesystem;
    use crate::journal::{Effect, Journal};
    use crate::node::{MemoryNodeStore, Node};
    use crate::source::{FetchedConfig, StaticSource};
    use crate::systemd::{MockServiceManager, Operation};

    const NODE: &str = "node-1";
    const MARKER: &str = "/var/lib/osc-agent/last-applied-osc.json";
    const APP_CONF: &str = r#"{"files":[{"path":"/etc/app.conf","content":{"inline":{"data":"a=1"}}}]}"#;

    struct Harness {
        journal: Journal,
        fs: MemoryFilesystem,
        systemd: MockServiceManager,
        source: StaticSource,
        nodes: MemoryNodeStore,
        reconciler: Reconciler,
    }

    fn harness_with(configure: impl FnOnce(&mut Config)) -> Harness {
        let journal = Journal::new();
        let fs = MemoryFilesystem::new().with_journal(journal.clone());
        let systemd = MockServiceManager::new().with_journal(journal.clone());
        let source = StaticSource::new();
        let nodes = MemoryNodeStore::new();

        let mut config = Config::default();
        config.agent.node_name = NODE.to_string();
        config.agent.kubernetes_version = Some("1.31.1".to_string());
        configure(&mut config);

        let reconciler = Reconciler::new(
            &config,
            Arc::new(fs.clone()),
            Arc::new(systemd.clone()),
            Arc::new(source.clone()),
            Arc::new(nodes.clone()),
        );

        Harness {
            journal,
            fs,
            systemd,
            source,
            nodes,
            reconciler,
        }
    }

    fn harness() -> Harness {
        harness_with(|_| {})
    }

    impl Harness {
        fn serve(&self, raw: &str) -> Checksum {
            let fetched = FetchedConfig::from_raw(raw.as_bytes().to_vec());
            let checksum = fetched.checksum.clone();
            self.source.set(fetched);
            checksum
        }

        fn register_node(&self) {
            self.nodes.register(Node::new(NODE));
        }

        fn recorded_checksum(&self) -> Option<String> {
            self.nodes
                .node(NODE)
                .and_then(|n| n.annotation(ANNOTATION_CHECKSUM).map(str::to_string))
        }
    }

    #[tokio::test]
    async fn absent_source_ends_pass_without_requeue() {
        let h = harness();
        h.register_node();

        let outcome = h.reconciler.reconcile().await.unwrap();

        assert_eq!(outcome, ReconcileOutcome::default());
        assert!(h.journal.is_empty());
    }

    #[tokio::test]
    async fn applies_persists_marker_and_annotates_node() {
        let h = harness();
        h.register_node();
        let checksum = h.serve(APP_CONF);

        let outcome = h.reconciler.reconcile().await.unwrap();

        assert_eq!(outcome.requeue_after, Some(Duration::from_secs(60)));
        assert_eq!(outcome.applied.unwrap().files_written, 1);
        assert_eq!(h.fs.contents("/etc/app.conf"), Some(b"a=1".to_vec()));
        assert_eq!(h.fs.contents(MARKER), Some(APP_CONF.as_bytes().to_vec()));
        assert_eq!(h.fs.file_mode(MARKER), Some(0o644));

        let node = h.nodes.node(NODE).unwrap();
        assert_eq!(node.annotation(ANNOTATION_CHECKSUM), Some(checksum.as_str()));
        assert_eq!(node.annotation(ANNOTATION_KUBERNETES_VERSION), Some("1.31.1"));
    }

    #[tokio::test]
    async fn converged_node_is_skipped() {
        let h = harness();
        h.register_node();
        h.serve(APP_CONF);
        h.reconciler.reconcile().await.unwrap();
        h.journal.clear();

        let outcome = h.reconciler.reconcile().await.unwrap();

        assert_eq!(outcome.requeue_after, Some(Duration::from_secs(60)));
        assert!(outcome.applied.is_none());
        assert!(h.journal.is_empty());
    }

    #[tokio::test]
    async fn missing_node_applies_and_retries_shortly() {
        let h = harness();
        h.serve(APP_CONF);

        let outcome = h.reconciler.reconcile().await.unwrap();

        assert_eq!(outcome.requeue_after, Some(Duration::from_secs(5)));
        assert!(outcome.applied.is_some());
        assert!(h.fs.contents(MARKER).is_some());

        // once the node registers, the next pass re-runs as a no-op and annotates it
        h.register_node();
        h.journal.clear();
        let outcome = h.reconciler.reconcile().await.unwrap();

        assert_eq!(outcome.requeue_after, Some(Duration::from_secs(60)));
        assert!(outcome.applied.unwrap().is_noop());
        assert!(h.journal.is_empty());
        assert!(h.recorded_checksum().is_some());
    }

    #[tokio::test]
    async fn failed_apply_leaves_marker_and_annotation_untouched() {
        let h = harness();
        h.register_node();
        h.serve(r#"{"units":[{"name":"foo.service","content":"F"}]}"#);
        h.systemd.fail_next(Operation::Restart, "foo.service", "job failed");

        let err = h.reconciler.reconcile().await.unwrap_err();

        assert!(matches!(err, ReconcileError::Apply(_)));
        assert!(h.fs.contents(MARKER).is_none());
        assert!(h.recorded_checksum().is_none());

        // the retry converges
        h.reconciler.reconcile().await.unwrap();
        assert!(h.recorded_checksum().is_some());
    }

    #[tokio::test]
    async fn retry_restarts_unit_written_by_failed_pass() {
        let h = harness();
        h.register_node();
        h.serve(r#"{"units":[{"name":"foo.service","content":"F1"}]}"#);
        h.reconciler.reconcile().await.unwrap();

        h.serve(r#"{"units":[{"name":"foo.service","content":"F2"}]}"#);
        h.systemd.fail_next(Operation::Restart, "foo.service", "job failed");
        h.reconciler.reconcile().await.unwrap_err();
        assert_eq!(
            h.fs.contents("/etc/systemd/system/foo.service"),
            Some(b"F2".to_vec())
        );
        h.journal.clear();

        let report = h.reconciler.reconcile().await.unwrap().applied.unwrap();

        assert_eq!(report.units_restarted, 1);
        assert_eq!(
            h.systemd.calls(),
            vec![
                Effect::Enable("foo.service".into()),
                Effect::DaemonReload,
                Effect::Restart("foo.service".into()),
            ]
        );
        assert!(h.recorded_checksum().is_some());
    }

    #[tokio::test]
    async fn retry_disables_unit_after_failed_disable() {
        let h = harness();
        h.register_node();
        h.serve(r#"{"units":[{"name":"foo.service","content":"F1"}]}"#);
        h.reconciler.reconcile().await.unwrap();

        h.serve(r#"{"units":[{"name":"foo.service","content":"F2","enable":false}]}"#);
        h.systemd.fail_next(Operation::Disable, "foo.service", "dbus timeout");
        h.reconciler.reconcile().await.unwrap_err();
        h.journal.clear();

        h.reconciler.reconcile().await.unwrap();

        assert_eq!(
            h.systemd.calls(),
            vec![
                Effect::Disable("foo.service".into()),
                Effect::DaemonReload,
                Effect::Stop("foo.service".into()),
            ]
        );
        assert!(h.recorded_checksum().is_some());
    }

    #[tokio::test]
    async fn removed_unit_is_deleted_on_next_checksum() {
        let h = harness();
        h.register_node();
        h.serve(r#"{"units":[{"name":"foo.service","content":"F"},{"name":"bar.service","content":"B"}]}"#);
        h.reconciler.reconcile().await.unwrap();
        h.journal.clear();

        h.serve(r#"{"units":[{"name":"foo.service","content":"F"}]}"#);
        let report = h.reconciler.reconcile().await.unwrap().applied.unwrap();

        assert_eq!(report.units_deleted, 1);
        assert_eq!(report.units_changed, 0);
        assert_eq!(
            h.systemd.calls(),
            vec![
                Effect::Disable("bar.service".into()),
                Effect::Stop("bar.service".into()),
                Effect::DaemonReload,
            ]
        );
        assert!(h.fs.contents("/etc/systemd/system/bar.service").is_none());
        assert!(h.fs.contents("/etc/systemd/system/foo.service").is_some());
    }

    #[tokio::test]
    async fn malformed_content_fails_before_any_change() {
        let h = harness();
        h.register_node();
        h.serve(
            r#"{"files":[
                {"path":"/etc/a.conf","content":{"inline":{"data":"a"}}},
                {"path":"/etc/b.conf","content":{"inline":{"encoding":"b64","data":"!!!"}}}
            ]}"#,
        );

        let err = h.reconciler.reconcile().await.unwrap_err();

        assert!(err.is_malformed_input());
        assert!(h.journal.is_empty());
    }

    #[tokio::test]
    async fn annotation_failure_fails_the_pass() {
        let h = harness();
        h.register_node();
        h.serve(APP_CONF);
        h.nodes.fail_next_annotate("conflict");

        let err = h.reconciler.reconcile().await.unwrap_err();

        assert!(matches!(err, ReconcileError::Annotate { .. }));
        // marker was written; the retry only annotates
        assert!(h.fs.contents(MARKER).is_some());
        let outcome = h.reconciler.reconcile().await.unwrap();
        assert!(outcome.applied.unwrap().is_noop());
        assert!(h.recorded_checksum().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn slow_pass_times_out() {
        let h = harness_with(|c| c.reconcile.timeout_secs = 1);
        h.register_node();
        h.serve(r#"{"units":[{"name":"slow.service"}]}"#);
        h.systemd.delay_unit("slow.service", Duration::from_secs(10));

        let err = h.reconciler.reconcile().await.unwrap_err();

        assert!(matches!(err, ReconcileError::Timeout(d) if d == Duration::from_secs(1)));
        assert!(h.recorded_checksum().is_none());
    }

    #[tokio::test]
    async fn diff_reports_pending_changes_without_applying() {
        let h = harness();
        assert!(h.reconciler.diff().await.unwrap().is_none());

        h.serve(APP_CONF);
        let changes = h.reconciler.diff().await.unwrap().unwrap();

        assert_eq!(changes.files.changed.len(), 1);
        assert!(h.journal.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn run_retries_failed_pass_and_stops_on_shutdown() {
        let h = harness();
        h.register_node();
        h.serve(APP_CONF);
        h.source.fail_next("connection refused");
        let (tx, rx) = watch::channel(false);

        let stop = async {
            // first retry happens after one second of backoff
            tokio::time::sleep(Duration::from_millis(1500)).await;
            tx.send(true).unwrap();
        };
        tokio::join!(h.reconciler.run(rx), stop);

        assert!(h.recorded_checksum().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn run_stops_when_sender_is_dropped() {
        let h = harness();
        let (tx, rx) = watch::channel(false);
        drop(tx);

        h.reconciler.run(rx).await;
    }
}
