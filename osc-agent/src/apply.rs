//! Apply engine.
//!
//! Executes a [`ChangeSet`] in six phases, strictly in order:
//!
//! 1. Write changed files through a scratch directory and an atomic rename
//! 2. Write changed units and drop-ins, then enable or disable them
//! 3. Disable, stop and remove deleted units
//! 4. Reload the service manager once
//! 5. Stop or restart every changed unit concurrently
//! 6. Remove deleted files
//!
//! A failed phase aborts the remaining ones. Nothing is rolled back: every
//! operation is idempotent, so the next pass repairs partial progress.

use futures_util::stream::{self, StreamExt};
use osc_core::{ChangeSet, ChangedFile, UnitChange};
use osc_types::{UnitAction, DEFAULT_FILE_PERMISSIONS};
use std::fmt;
use std::path::{Path, PathBuf};

use crate::error::{ApplyError, StepError};
use crate::fs::{ignore_not_found, Filesystem};
use crate::observe::{drop_in_dir, unit_path};
use crate::systemd::ServiceManager;

/// Default systemd unit directory.
pub const DEFAULT_UNIT_DIR: &str = "/etc/systemd/system";

/// Default parent of the per-pass scratch directory.
pub const DEFAULT_SCRATCH_DIR: &str = "/var/lib/osc-agent/tmp";

/// Name prefix of the per-pass scratch directory.
pub const SCRATCH_PREFIX: &str = "osc-agent-";

/// Default bound on concurrent unit commands.
pub const DEFAULT_MAX_PARALLEL_UNIT_COMMANDS: usize = 10;

/// The six apply phases, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Phase {
    /// Phase 1.
    WriteFiles,
    /// Phase 2.
    WriteUnits,
    /// Phase 3.
    DeleteUnits,
    /// Phase 4.
    DaemonReload,
    /// Phase 5.
    UnitCommands,
    /// Phase 6.
    DeleteFiles,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::WriteFiles => "writing files",
            Self::WriteUnits => "writing units",
            Self::DeleteUnits => "deleting units",
            Self::DaemonReload => "reloading daemon",
            Self::UnitCommands => "executing unit commands",
            Self::DeleteFiles => "deleting files",
        })
    }
}

/// Paths and limits used while applying.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApplySettings {
    /// Directory unit files are written to.
    pub unit_dir: PathBuf,
    /// Parent of the per-pass scratch directory. Must be on the same
    /// filesystem as the managed files for renames to be atomic.
    pub scratch_dir: PathBuf,
    /// Upper bound on concurrent stop/restart calls in phase 5.
    pub max_parallel_unit_commands: usize,
}

impl Default for ApplySettings {
    fn default() -> Self {
        Self {
            unit_dir: PathBuf::from(DEFAULT_UNIT_DIR),
            scratch_dir: PathBuf::from(DEFAULT_SCRATCH_DIR),
            max_parallel_unit_commands: DEFAULT_MAX_PARALLEL_UNIT_COMMANDS,
        }
    }
}

/// What a successful apply did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ApplyReport {
    /// Files written in phase 1.
    pub files_written: usize,
    /// Units processed in phase 2.
    pub units_changed: usize,
    /// Drop-ins written in phase 2.
    pub drop_ins_written: usize,
    /// Drop-ins removed in phase 2.
    pub drop_ins_deleted: usize,
    /// Units removed in phase 3.
    pub units_deleted: usize,
    /// Units restarted in phase 5.
    pub units_restarted: usize,
    /// Units stopped in phase 5.
    pub units_stopped: usize,
    /// Files removed in phase 6.
    pub files_deleted: usize,
}

impl ApplyReport {
    /// True if nothing was touched.
    pub fn is_noop(&self) -> bool {
        *self == Self::default()
    }
}

fn at(phase: Phase) -> impl FnOnce(StepError) -> ApplyError {
    move |source| ApplyError::new(phase, source)
}

/// Applies change sets to a node.
pub struct Applier<'a> {
    fs: &'a dyn Filesystem,
    systemd: &'a dyn ServiceManager,
    settings: &'a ApplySettings,
}

impl<'a> Applier<'a> {
    /// Create an applier.
    pub fn new(
        fs: &'a dyn Filesystem,
        systemd: &'a dyn ServiceManager,
        settings: &'a ApplySettings,
    ) -> Self {
        Self {
            fs,
            systemd,
            settings,
        }
    }

    /// Apply `changes`.
    ///
    /// An empty change set touches nothing, not even the service manager.
    pub async fn apply(&self, changes: &ChangeSet) -> Result<ApplyReport, ApplyError> {
        let mut report = ApplyReport::default();
        if changes.is_empty() {
            tracing::debug!("No changes to apply");
            return Ok(report);
        }

        report.files_written = self
            .write_files(&changes.files.changed)
            .await
            .map_err(at(Phase::WriteFiles))?;

        self.write_units(&changes.units.changed, &mut report)
            .await
            .map_err(at(Phase::WriteUnits))?;

        report.units_deleted = self
            .delete_units(&changes.units.deleted)
            .await
            .map_err(at(Phase::DeleteUnits))?;

        self.systemd
            .daemon_reload()
            .await
            .map_err(|e| ApplyError::new(Phase::DaemonReload, StepError::Reload(e)))?;
        tracing::info!("Reloaded systemd daemon");

        let (restarted, stopped) = self
            .execute_unit_commands(&changes.units.changed)
            .await
            .map_err(at(Phase::UnitCommands))?;
        report.units_restarted = restarted;
        report.units_stopped = stopped;

        report.files_deleted = self
            .delete_files(&changes.files.deleted)
            .await
            .map_err(at(Phase::DeleteFiles))?;

        Ok(report)
    }

    async fn write_files(&self, files: &[ChangedFile]) -> Result<usize, StepError> {
        if files.is_empty() {
            return Ok(0);
        }

        let parent = &self.settings.scratch_dir;
        self.fs
            .create_dir_all(parent)
            .await
            .map_err(|e| StepError::fs("create scratch directory", parent, e))?;
        let scratch = self
            .fs
            .create_temp_dir(parent, SCRATCH_PREFIX)
            .await
            .map_err(|e| StepError::fs("create scratch directory", parent, e))?;

        let result = self.write_files_via(&scratch, files).await;

        if let Err(e) = self.fs.remove_dir_all(&scratch).await {
            tracing::warn!(path = %scratch.display(), error = %e, "Failed to remove scratch directory");
        }

        result
    }

    async fn write_files_via(&self, scratch: &Path, files: &[ChangedFile]) -> Result<usize, StepError> {
        for (index, file) in files.iter().enumerate() {
            let path = Path::new(file.path());

            if let Some(dir) = path.parent() {
                self.fs
                    .create_dir_all(dir)
                    .await
                    .map_err(|e| StepError::fs("create directory", dir, e))?;
            }

            // index prefix keeps files with equal base names apart
            let base = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            let tmp = scratch.join(format!("{index}-{base}"));

            self.fs
                .write_file(&tmp, &file.data, file.mode())
                .await
                .map_err(|e| StepError::fs("write temporary file", &tmp, e))?;
            self.fs
                .rename(&tmp, path)
                .await
                .map_err(|e| StepError::fs("rename into place", path, e))?;

            tracing::info!(path = %path.display(), mode = %format!("{:o}", file.mode()), "Applied new or changed file");
        }

        Ok(files.len())
    }

    /// Write `content` unless the file already holds it, then reset its
    /// permissions. Returns whether the file was written.
    async fn write_managed(&self, path: &Path, content: &str) -> Result<bool, StepError> {
        let current = self
            .fs
            .read_if_exists(path)
            .await
            .map_err(|e| StepError::fs("read", path, e))?;

        let written = current.as_deref() != Some(content.as_bytes());
        if written {
            self.fs
                .write_file(path, content.as_bytes(), DEFAULT_FILE_PERMISSIONS)
                .await
                .map_err(|e| StepError::fs("write", path, e))?;
        }

        // manual edits of the mode are reverted on every pass
        self.fs
            .set_permissions(path, DEFAULT_FILE_PERMISSIONS)
            .await
            .map_err(|e| StepError::fs("reset permissions of", path, e))?;

        Ok(written)
    }

    async fn write_units(&self, units: &[UnitChange], report: &mut ApplyReport) -> Result<(), StepError> {
        if units.is_empty() {
            return Ok(());
        }

        let unit_dir = &self.settings.unit_dir;
        self.fs
            .create_dir_all(unit_dir)
            .await
            .map_err(|e| StepError::fs("create unit directory", unit_dir, e))?;

        for change in units {
            let unit = &change.unit;

            if let Some(content) = &unit.content {
                let path = unit_path(unit_dir, &unit.name);
                if self.write_managed(&path, content).await? {
                    tracing::info!(path = %path.display(), unit = %unit.name, "Applied new or changed unit file");
                }
            }

            let dir = drop_in_dir(unit_dir, &unit.name);
            if unit.drop_ins.is_empty() {
                ignore_not_found(self.fs.remove_dir_all(&dir).await)
                    .map_err(|e| StepError::fs("remove drop-in directory", &dir, e))?;
            } else {
                self.fs
                    .create_dir_all(&dir)
                    .await
                    .map_err(|e| StepError::fs("create drop-in directory", &dir, e))?;

                for drop_in in &change.drop_ins.changed {
                    let path = dir.join(&drop_in.name);
                    if self.write_managed(&path, &drop_in.content).await? {
                        report.drop_ins_written += 1;
                        tracing::info!(path = %path.display(), unit = %unit.name, "Applied new or changed drop-in file");
                    }
                }

                for name in &change.drop_ins.deleted {
                    let path = dir.join(name);
                    ignore_not_found(self.fs.remove_file(&path).await)
                        .map_err(|e| StepError::fs("remove drop-in", &path, e))?;
                    report.drop_ins_deleted += 1;
                    tracing::info!(path = %path.display(), unit = %unit.name, "Removed no longer needed drop-in file");
                }
            }

            if unit.enable {
                self.systemd
                    .enable(&unit.name)
                    .await
                    .map_err(|e| StepError::unit("enable", &unit.name, e))?;
                tracing::info!(unit = %unit.name, "Enabled unit");
            } else {
                self.systemd
                    .disable(&unit.name)
                    .await
                    .map_err(|e| StepError::unit("disable", &unit.name, e))?;
                tracing::info!(unit = %unit.name, "Disabled unit");
            }

            report.units_changed += 1;
        }

        Ok(())
    }

    async fn delete_units(&self, units: &[String]) -> Result<usize, StepError> {
        let unit_dir = &self.settings.unit_dir;

        for name in units {
            // disable first so nothing re-activates the unit while it stops
            if let Err(e) = self.systemd.disable(name).await {
                if !e.is_unit_not_found() {
                    return Err(StepError::unit("disable", name, e));
                }
            }
            if let Err(e) = self.systemd.stop(name).await {
                if !e.is_unit_not_found() {
                    return Err(StepError::unit("stop", name, e));
                }
            }

            let path = unit_path(unit_dir, name);
            ignore_not_found(self.fs.remove_file(&path).await)
                .map_err(|e| StepError::fs("remove unit file", &path, e))?;

            let dir = drop_in_dir(unit_dir, name);
            ignore_not_found(self.fs.remove_dir_all(&dir).await)
                .map_err(|e| StepError::fs("remove drop-in directory", &dir, e))?;

            tracing::info!(unit = %name, "Removed no longer needed unit");
        }

        Ok(units.len())
    }

    /// Returns the number of restarted and stopped units.
    ///
    /// Every command runs to completion before the first error is returned.
    async fn execute_unit_commands(&self, units: &[UnitChange]) -> Result<(usize, usize), StepError> {
        let systemd = self.systemd;
        let limit = self.settings.max_parallel_unit_commands.max(1);

        let results: Vec<Result<UnitAction, StepError>> = stream::iter(units.iter().map(|change| {
            let name = change.unit.name.as_str();
            let action = change.unit.action();
            async move {
                let result = match action {
                    UnitAction::Stop => systemd
                        .stop(name)
                        .await
                        .map_err(|e| StepError::unit("stop", name, e)),
                    UnitAction::Restart => systemd
                        .restart(name)
                        .await
                        .map_err(|e| StepError::unit("restart", name, e)),
                };
                if result.is_ok() {
                    tracing::info!(unit = %name, action = ?action, "Executed unit command");
                }
                result.map(|()| action)
            }
        }))
        .buffer_unordered(limit)
        .collect()
        .await;

        let mut restarted = 0;
        let mut stopped = 0;
        let mut first_error = None;
        for result in results {
            match result {
                Ok(UnitAction::Restart) => restarted += 1,
                Ok(UnitAction::Stop) => stopped += 1,
                Err(e) => {
                    tracing::warn!(error = %e, "Unit command failed");
                    if first_error.is_none() {
                        first_error = Some(e);
                    }
                }
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok((restarted, stopped)),
        }
    }

    async fn delete_files(&self, paths: &[String]) -> Result<usize, StepError> {
        for path in paths {
            let path = Path::new(path);
            ignore_not_found(self.fs.remove_file(path).await)
                .map_err(|e| StepError::fs("remove file", path, e))?;
            tracing::info!(path = %path.display(), "Removed no longer needed file");
        }

        Ok(paths.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::MemoryFilesystem;
    use crate::journal::{Effect, Journal};
    use crate::observe::observe;
    use crate::systemd::{MockServiceManager, Operation};
    use osc_core::compute_changes;
    use osc_types::OperatingSystemConfig;
    use std::time::Duration;

    struct Node {
        journal: Journal,
        fs: MemoryFilesystem,
        systemd: MockServiceManager,
        settings: ApplySettings,
    }

    impl Node {
        fn new() -> Self {
            let journal = Journal::new();
            Self {
                fs: MemoryFilesystem::new().with_journal(journal.clone()),
                systemd: MockServiceManager::new().with_journal(journal.clone()),
                journal,
                settings: ApplySettings::default(),
            }
        }

        async fn plan(&self, desired: &str, previous: Option<&str>) -> ChangeSet {
            let desired = OperatingSystemConfig::from_slice(desired.as_bytes()).unwrap();
            let previous = previous.map(|p| OperatingSystemConfig::from_slice(p.as_bytes()).unwrap());
            let observed = observe(&self.fs, &self.settings.unit_dir, &desired, previous)
                .await
                .unwrap();
            compute_changes(&observed, &desired).unwrap()
        }

        async fn apply(&self, changes: &ChangeSet) -> Result<ApplyReport, ApplyError> {
            Applier::new(&self.fs, &self.systemd, &self.settings)
                .apply(changes)
                .await
        }

        fn position(&self, effect: Effect) -> usize {
            self.journal
                .position(&effect)
                .unwrap_or_else(|| panic!("{effect:?} not recorded"))
        }
    }

    fn path(p: &str) -> PathBuf {
        PathBuf::from(p)
    }

    const APP_CONF: &str = r#"{"files":[{"path":"/etc/app.conf","content":{"inline":{"data":"a=1"}}}]}"#;

    #[tokio::test]
    async fn new_file_is_written_atomically() {
        let node = Node::new();
        let changes = node.plan(APP_CONF, None).await;
        assert_eq!(changes.files.changed.len(), 1);

        let report = node.apply(&changes).await.unwrap();

        assert_eq!(report.files_written, 1);
        assert_eq!(node.fs.contents("/etc/app.conf"), Some(b"a=1".to_vec()));
        assert_eq!(node.fs.file_mode("/etc/app.conf"), Some(0o600));

        let renamed = node.journal.entries().into_iter().any(|e| {
            matches!(e, Effect::Rename { from, to }
                if to == path("/etc/app.conf") && from.starts_with(DEFAULT_SCRATCH_DIR))
        });
        assert!(renamed);
        assert!(node.fs.files_under(DEFAULT_SCRATCH_DIR).is_empty());
        assert!(!node.fs.dir_exists("/var/lib/osc-agent/tmp/osc-agent-1"));
    }

    #[tokio::test]
    async fn declared_permissions_and_base64_are_honored() {
        let node = Node::new();
        let changes = node
            .plan(
                r#"{"files":[{"path":"/opt/bin/run","permissions":493,"content":{"inline":{"encoding":"b64","data":"IyEvYmluL3No"}}}]}"#,
                None,
            )
            .await;

        node.apply(&changes).await.unwrap();

        assert_eq!(node.fs.contents("/opt/bin/run"), Some(b"#!/bin/sh".to_vec()));
        assert_eq!(node.fs.file_mode("/opt/bin/run"), Some(0o755));
    }

    #[tokio::test]
    async fn unchanged_unit_is_not_touched() {
        let node = Node::new();
        let osc = r#"{"units":[{"name":"foo.service","enable":true,"content":"X"}]}"#;
        node.fs.seed_file("/etc/systemd/system/foo.service", b"X", 0o600);

        let changes = node.plan(osc, Some(osc)).await;
        assert!(changes.units.changed.is_empty());

        let report = node.apply(&changes).await.unwrap();

        assert!(report.is_noop());
        assert!(node.journal.is_empty());
    }

    #[tokio::test]
    async fn deleted_unit_is_disabled_stopped_then_removed() {
        let node = Node::new();
        node.fs.seed_file("/etc/systemd/system/bar.service", b"B", 0o600);
        node.fs
            .seed_file("/etc/systemd/system/bar.service.d/10-a.conf", b"a", 0o600);

        let changes = node
            .plan(r#"{}"#, Some(r#"{"units":[{"name":"bar.service","content":"B"}]}"#))
            .await;
        assert_eq!(changes.units.deleted, vec!["bar.service".to_string()]);

        let report = node.apply(&changes).await.unwrap();
        assert_eq!(report.units_deleted, 1);

        let disable = node.position(Effect::Disable("bar.service".into()));
        let stop = node.position(Effect::Stop("bar.service".into()));
        let remove = node.position(Effect::Remove(path("/etc/systemd/system/bar.service")));
        let remove_dir = node.position(Effect::RemoveAll(path("/etc/systemd/system/bar.service.d")));
        let reload = node.position(Effect::DaemonReload);

        assert!(disable < stop);
        assert!(stop < remove);
        assert!(remove < remove_dir);
        assert!(remove_dir < reload);
        assert!(node.fs.files_under("/etc/systemd/system").is_empty());
    }

    #[tokio::test]
    async fn deleting_an_unknown_unit_succeeds() {
        let node = Node::new();
        node.systemd.forget_unit("bar.service");

        let changes = node
            .plan(r#"{}"#, Some(r#"{"units":[{"name":"bar.service"}]}"#))
            .await;

        node.apply(&changes).await.unwrap();
        assert_eq!(node.systemd.calls(), vec![Effect::DaemonReload]);
    }

    #[tokio::test]
    async fn disabled_unit_is_stopped_not_restarted() {
        let node = Node::new();
        let changes = node
            .plan(r#"{"units":[{"name":"foo.service","enable":false,"content":"X"}]}"#, None)
            .await;

        let report = node.apply(&changes).await.unwrap();

        assert_eq!(report.units_stopped, 1);
        assert_eq!(report.units_restarted, 0);
        assert_eq!(
            node.systemd.calls(),
            vec![
                Effect::Disable("foo.service".into()),
                Effect::DaemonReload,
                Effect::Stop("foo.service".into()),
            ]
        );
    }

    #[tokio::test]
    async fn explicit_stop_command_wins_over_enable() {
        let node = Node::new();
        let changes = node
            .plan(r#"{"units":[{"name":"foo.service","command":"stop"}]}"#, None)
            .await;

        node.apply(&changes).await.unwrap();

        assert_eq!(
            node.systemd.calls(),
            vec![
                Effect::Enable("foo.service".into()),
                Effect::DaemonReload,
                Effect::Stop("foo.service".into()),
            ]
        );
    }

    #[tokio::test]
    async fn phases_run_in_order() {
        let node = Node::new();
        node.fs.seed_file("/etc/old.conf", b"old", 0o600);
        let previous = r#"{
            "files": [{"path": "/etc/old.conf", "content": {"inline": {"data": "old"}}}],
            "units": [{"name": "bar.service", "content": "B"}]
        }"#;
        let desired = r#"{
            "files": [{"path": "/etc/app.conf", "content": {"inline": {"data": "a=1"}}}],
            "units": [{"name": "foo.service", "content": "F"}]
        }"#;

        let changes = node.plan(desired, Some(previous)).await;
        node.apply(&changes).await.unwrap();

        let file_written = node.position(Effect::Write(path("/etc/systemd/system/foo.service")));
        let file_renamed = node
            .journal
            .entries()
            .iter()
            .position(|e| matches!(e, Effect::Rename { to, .. } if to == &path("/etc/app.conf")))
            .unwrap();
        let enable = node.position(Effect::Enable("foo.service".into()));
        let disable = node.position(Effect::Disable("bar.service".into()));
        let reload = node.position(Effect::DaemonReload);
        let restart = node.position(Effect::Restart("foo.service".into()));
        let delete = node.position(Effect::Remove(path("/etc/old.conf")));

        assert!(file_renamed < file_written);
        assert!(file_written < enable);
        assert!(enable < disable);
        assert!(disable < reload);
        assert!(reload < restart);
        assert!(restart < delete);
        assert!(node.fs.contents("/etc/old.conf").is_none());
    }

    #[tokio::test]
    async fn drop_in_directory_removed_when_last_drop_in_goes() {
        let node = Node::new();
        node.fs.seed_file("/etc/systemd/system/foo.service", b"F", 0o600);
        node.fs
            .seed_file("/etc/systemd/system/foo.service.d/10-a.conf", b"a", 0o600);
        node.fs
            .seed_file("/etc/systemd/system/foo.service.d/20-b.conf", b"b", 0o600);

        let previous = r#"{"units":[{"name":"foo.service","content":"F","dropIns":[
            {"name":"10-a.conf","content":"a"},{"name":"20-b.conf","content":"b"}]}]}"#;
        let changes = node
            .plan(r#"{"units":[{"name":"foo.service","content":"F"}]}"#, Some(previous))
            .await;
        assert_eq!(changes.units.changed.len(), 1);

        node.apply(&changes).await.unwrap();

        assert!(!node.fs.dir_exists("/etc/systemd/system/foo.service.d"));
        assert_eq!(node.fs.contents("/etc/systemd/system/foo.service"), Some(b"F".to_vec()));
    }

    #[tokio::test]
    async fn drop_ins_are_written_and_removed() {
        let node = Node::new();
        node.fs
            .seed_file("/etc/systemd/system/foo.service.d/10-a.conf", b"old", 0o644);
        node.fs
            .seed_file("/etc/systemd/system/foo.service.d/20-b.conf", b"b", 0o600);

        let previous = r#"{"units":[{"name":"foo.service","dropIns":[
            {"name":"10-a.conf","content":"old"},{"name":"20-b.conf","content":"b"}]}]}"#;
        let desired = r#"{"units":[{"name":"foo.service","dropIns":[{"name":"10-a.conf","content":"new"}]}]}"#;

        let report = node.apply(&node.plan(desired, Some(previous)).await).await.unwrap();

        assert_eq!(report.drop_ins_written, 1);
        assert_eq!(report.drop_ins_deleted, 1);
        assert_eq!(
            node.fs.contents("/etc/systemd/system/foo.service.d/10-a.conf"),
            Some(b"new".to_vec())
        );
        assert_eq!(
            node.fs.file_mode("/etc/systemd/system/foo.service.d/10-a.conf"),
            Some(0o600)
        );
        assert!(node
            .fs
            .contents("/etc/systemd/system/foo.service.d/20-b.conf")
            .is_none());
    }

    #[tokio::test]
    async fn unit_permissions_are_reset_even_when_content_matches() {
        let node = Node::new();
        node.fs.seed_file("/etc/systemd/system/foo.service", b"X", 0o666);

        // no previous record, so the unit counts as changed
        let changes = node
            .plan(r#"{"units":[{"name":"foo.service","content":"X"}]}"#, None)
            .await;
        node.apply(&changes).await.unwrap();

        assert_eq!(node.fs.file_mode("/etc/systemd/system/foo.service"), Some(0o600));
        assert!(node
            .journal
            .position(&Effect::Write(path("/etc/systemd/system/foo.service")))
            .is_none());
    }

    #[tokio::test]
    async fn deleting_absent_files_succeeds() {
        let node = Node::new();
        let changes = node
            .plan(r#"{}"#, Some(r#"{"files":[{"path":"/etc/gone.conf","content":{"inline":{"data":"x"}}}]}"#))
            .await;
        assert_eq!(changes.files.deleted, vec!["/etc/gone.conf".to_string()]);

        let report = node.apply(&changes).await.unwrap();
        assert_eq!(report.files_deleted, 1);
    }

    #[tokio::test]
    async fn failed_write_aborts_before_reload() {
        let node = Node::new();
        node.fs.fail_next("/etc/app.conf", "read-only filesystem");
        let changes = node
            .plan(
                r#"{"files":[{"path":"/etc/app.conf","content":{"inline":{"data":"a=1"}}}],
                    "units":[{"name":"foo.service","content":"F"}]}"#,
                None,
            )
            .await;

        let err = node.apply(&changes).await.unwrap_err();

        assert_eq!(err.phase, Phase::WriteFiles);
        assert!(node.systemd.calls().is_empty());
        assert!(node.fs.files_under(DEFAULT_SCRATCH_DIR).is_empty());
    }

    #[tokio::test]
    async fn failed_unit_command_lets_siblings_finish() {
        let node = Node::new();
        node.systemd.fail_next(Operation::Restart, "a.service", "job failed");
        node.systemd.delay_unit("b.service", Duration::from_millis(50));

        let changes = node
            .plan(
                r#"{"files":[{"path":"/etc/app.conf","content":{"inline":{"data":"a=1"}}}],
                    "units":[{"name":"a.service"},{"name":"b.service"},{"name":"c.service"}]}"#,
                Some(r#"{"files":[{"path":"/etc/old.conf","content":{"inline":{"data":"o"}}}]}"#),
            )
            .await;
        node.fs.seed_file("/etc/old.conf", b"o", 0o600);

        let err = node.apply(&changes).await.unwrap_err();

        assert_eq!(err.phase, Phase::UnitCommands);
        assert!(err.to_string().contains("a.service"));
        let calls = node.systemd.calls();
        assert!(calls.contains(&Effect::Restart("b.service".into())));
        assert!(calls.contains(&Effect::Restart("c.service".into())));
        // phase 6 never ran
        assert_eq!(node.fs.contents("/etc/old.conf"), Some(b"o".to_vec()));
    }

    #[tokio::test]
    async fn unit_commands_run_concurrently_within_bound() {
        let mut node = Node::new();
        node.settings.max_parallel_unit_commands = 2;
        let names = ["a", "b", "c", "d", "e"];
        for name in names {
            node.systemd
                .delay_unit(&format!("{name}.service"), Duration::from_millis(20));
        }
        let units: Vec<String> = names
            .iter()
            .map(|n| format!(r#"{{"name":"{n}.service"}}"#))
            .collect();
        let desired = format!(r#"{{"units":[{}]}}"#, units.join(","));

        let report = node.apply(&node.plan(&desired, None).await).await.unwrap();

        assert_eq!(report.units_restarted, 5);
        assert_eq!(node.systemd.max_in_flight(), 2);
    }

    #[tokio::test]
    async fn second_pass_is_a_noop() {
        let node = Node::new();
        let osc = r#"{
            "files": [{"path": "/etc/app.conf", "content": {"inline": {"data": "a=1"}}}],
            "units": [{"name": "foo.service", "content": "F", "dropIns": [{"name": "10-a.conf", "content": "a"}]}]
        }"#;

        node.apply(&node.plan(osc, None).await).await.unwrap();
        node.journal.clear();

        let changes = node.plan(osc, Some(osc)).await;
        assert!(changes.is_empty());

        let report = node.apply(&changes).await.unwrap();
        assert!(report.is_noop());
        assert!(node.journal.is_empty());
    }
}
