//! Gathering the observed node state.
//!
//! Only paths named by the desired configuration are read. Nothing is
//! discovered by scanning directories, so unmanaged files that share a
//! directory with managed ones are never considered.

use osc_core::{ObservedFile, ObservedState, ObservedUnit};
use osc_types::OperatingSystemConfig;
use std::path::{Path, PathBuf};

use crate::fs::{Filesystem, FsError};

/// Path of a unit file below `unit_dir`.
pub fn unit_path(unit_dir: &Path, unit: &str) -> PathBuf {
    unit_dir.join(unit)
}

/// Drop-in directory of a unit below `unit_dir`.
pub fn drop_in_dir(unit_dir: &Path, unit: &str) -> PathBuf {
    unit_dir.join(format!("{unit}.d"))
}

/// Read the on-disk state relevant to `desired`.
pub async fn observe(
    fs: &dyn Filesystem,
    unit_dir: &Path,
    desired: &OperatingSystemConfig,
    previous: Option<OperatingSystemConfig>,
) -> Result<ObservedState, FsError> {
    let mut state = ObservedState::new();

    for file in &desired.files {
        if file.content.inline.is_none() {
            continue;
        }
        let path = Path::new(&file.path);
        let Some(content) = fs.read_if_exists(path).await? else {
            continue;
        };
        let mode = fs.mode(path).await?;
        state
            .files
            .insert(file.path.clone(), ObservedFile { content, mode });
    }

    for unit in &desired.units {
        let mut observed = ObservedUnit {
            content: fs
                .read_if_exists(&unit_path(unit_dir, &unit.name))
                .await?
                .map(|bytes| String::from_utf8_lossy(&bytes).into_owned()),
            ..ObservedUnit::default()
        };

        let dir = drop_in_dir(unit_dir, &unit.name);
        for drop_in in &unit.drop_ins {
            if let Some(bytes) = fs.read_if_exists(&dir.join(&drop_in.name)).await? {
                observed.drop_ins.insert(
                    drop_in.name.clone(),
                    String::from_utf8_lossy(&bytes).into_owned(),
                );
            }
        }

        if observed.content.is_some() || !observed.drop_ins.is_empty() {
            state.units.insert(unit.name.clone(), observed);
        }
    }

    state.previous = previous;
    Ok(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::MemoryFilesystem;
    use osc_types::{DropIn, Unit};

    const UNIT_DIR: &str = "/etc/systemd/system";

    fn desired() -> OperatingSystemConfig {
        OperatingSystemConfig::from_slice(
            br#"{
                "files": [
                    {"path": "/etc/app.conf", "content": {"inline": {"data": "a=1"}}},
                    {"path": "/etc/other.conf", "content": {}}
                ],
                "units": [
                    {"name": "foo.service", "content": "[Unit]", "dropIns": [{"name": "10-a.conf", "content": "x"}]}
                ]
            }"#,
        )
        .unwrap()
    }

    #[tokio::test]
    async fn empty_disk_observes_nothing() {
        let fs = MemoryFilesystem::new();

        let state = observe(&fs, Path::new(UNIT_DIR), &desired(), None)
            .await
            .unwrap();

        assert!(state.files.is_empty());
        assert!(state.units.is_empty());
        assert!(state.previous.is_none());
    }

    #[tokio::test]
    async fn reads_managed_paths_only() {
        let fs = MemoryFilesystem::new();
        fs.seed_file("/etc/app.conf", b"a=0", 0o644);
        fs.seed_file("/etc/other.conf", b"untouched", 0o644);
        fs.seed_file("/etc/unmanaged.conf", b"u", 0o644);
        fs.seed_file("/etc/systemd/system/foo.service", b"[Unit]", 0o600);
        fs.seed_file("/etc/systemd/system/foo.service.d/10-a.conf", b"y", 0o600);
        fs.seed_file("/etc/systemd/system/foo.service.d/99-manual.conf", b"z", 0o600);

        let previous = OperatingSystemConfig {
            units: vec![Unit::new("bar.service", None)],
            ..Default::default()
        };
        let state = observe(&fs, Path::new(UNIT_DIR), &desired(), Some(previous))
            .await
            .unwrap();

        assert_eq!(state.files.len(), 1);
        assert_eq!(state.files["/etc/app.conf"].content, b"a=0");
        assert_eq!(state.files["/etc/app.conf"].mode, 0o644);

        let unit = &state.units["foo.service"];
        assert_eq!(unit.content.as_deref(), Some("[Unit]"));
        assert_eq!(unit.drop_ins.len(), 1);
        assert_eq!(unit.drop_ins["10-a.conf"], "y");

        assert!(state.previous.unwrap().unit("bar.service").is_some());
    }

    #[test]
    fn unit_paths() {
        let dir = Path::new(UNIT_DIR);
        assert_eq!(
            drop_in_dir(dir, "foo.service").join(DropIn::new("10-a.conf", "").name),
            PathBuf::from("/etc/systemd/system/foo.service.d/10-a.conf")
        );
        assert_eq!(
            unit_path(dir, "foo.service"),
            PathBuf::from("/etc/systemd/system/foo.service")
        );
    }
}
