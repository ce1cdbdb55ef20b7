//! Change computation.
//!
//! [`compute_changes`] classifies every file, unit and drop-in of a desired
//! configuration into "new or changed" and "deleted", relative to the last
//! applied configuration and the contents observed on disk. Comparisons are
//! byte-exact; timestamps are never looked at, so re-applying identical
//! content always yields an empty [`ChangeSet`].

use osc_types::{DropIn, File, OperatingSystemConfig, OscError, Unit};
use std::collections::HashSet;
use thiserror::Error;

use crate::observed::{ObservedState, ObservedUnit};

/// Errors from change computation.
#[derive(Debug, Error)]
pub enum ChangeError {
    /// A desired file carries content that cannot be decoded.
    #[error("invalid desired content: {0}")]
    InvalidContent(#[from] OscError),
}

/// The diff between the desired configuration and the node.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChangeSet {
    /// File changes.
    pub files: FileChanges,
    /// Unit changes.
    pub units: UnitChanges,
}

impl ChangeSet {
    /// True when applying this change set would do nothing.
    pub fn is_empty(&self) -> bool {
        self.files.changed.is_empty()
            && self.files.deleted.is_empty()
            && self.units.changed.is_empty()
            && self.units.deleted.is_empty()
    }
}

/// New/changed and deleted files. Disjoint by path.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileChanges {
    /// Files to (re)write, with their decoded payload.
    pub changed: Vec<ChangedFile>,
    /// Paths of files no longer desired.
    pub deleted: Vec<String>,
}

/// A desired file whose content or permissions differ from disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangedFile {
    /// The desired file.
    pub file: File,
    /// Its decoded content.
    pub data: Vec<u8>,
}

impl ChangedFile {
    /// Absolute target path.
    pub fn path(&self) -> &str {
        &self.file.path
    }

    /// Permission bits to write with.
    pub fn mode(&self) -> u32 {
        self.file.mode()
    }
}

/// New/changed and deleted units. A unit never appears in both lists.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UnitChanges {
    /// Units to write, register and (re)start or stop.
    pub changed: Vec<UnitChange>,
    /// Names of units no longer desired.
    pub deleted: Vec<String>,
}

/// A desired unit annotated with its drop-in sub-diff.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnitChange {
    /// The desired unit.
    pub unit: Unit,
    /// Drop-in changes within this unit.
    pub drop_ins: DropInChanges,
}

/// Drop-in changes of one unit.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DropInChanges {
    /// Drop-ins whose content differs from disk.
    pub changed: Vec<DropIn>,
    /// Names of drop-ins no longer desired.
    pub deleted: Vec<String>,
}

impl DropInChanges {
    fn is_empty(&self) -> bool {
        self.changed.is_empty() && self.deleted.is_empty()
    }
}

/// Compute the changes required to converge `observed` to `desired`.
///
/// Pure and deterministic: changed entries follow the order of `desired`,
/// deleted entries follow the order of the previous configuration. A decode
/// failure of any file aborts the whole computation.
pub fn compute_changes(
    observed: &ObservedState,
    desired: &OperatingSystemConfig,
) -> Result<ChangeSet, ChangeError> {
    Ok(ChangeSet {
        files: file_changes(observed, desired)?,
        units: unit_changes(observed, desired),
    })
}

fn file_changes(
    observed: &ObservedState,
    desired: &OperatingSystemConfig,
) -> Result<FileChanges, ChangeError> {
    let mut changes = FileChanges::default();

    for file in &desired.files {
        // files without inline content are not managed by content
        let Some(data) = file.decoded()? else {
            continue;
        };

        let up_to_date = observed
            .files
            .get(&file.path)
            .is_some_and(|current| current.content == data && current.mode == file.mode());

        if !up_to_date {
            changes.changed.push(ChangedFile {
                file: file.clone(),
                data,
            });
        }
    }

    if let Some(previous) = &observed.previous {
        let wanted: HashSet<&str> = desired.files.iter().map(|f| f.path.as_str()).collect();
        changes.deleted = previous
            .files
            .iter()
            .filter(|f| !wanted.contains(f.path.as_str()))
            .map(|f| f.path.clone())
            .collect();
    }

    Ok(changes)
}

fn unit_changes(observed: &ObservedState, desired: &OperatingSystemConfig) -> UnitChanges {
    let mut changes = UnitChanges::default();
    let previous = observed.previous.as_ref();
    let missing = ObservedUnit::default();

    for unit in &desired.units {
        let current = observed.units.get(&unit.name).unwrap_or(&missing);
        let last_applied = previous.and_then(|p| p.unit(&unit.name));

        let drop_ins = drop_in_changes(unit, current, last_applied);

        let content_differs = unit
            .content
            .as_ref()
            .is_some_and(|content| current.content.as_ref() != Some(content));

        // anything not recorded as applied is redone, even if the disk already
        // matches: an interrupted pass may have written it without registering it
        let unapplied = last_applied != Some(unit);

        if content_differs || unapplied || !drop_ins.is_empty() {
            changes.changed.push(UnitChange {
                unit: unit.clone(),
                drop_ins,
            });
        }
    }

    if let Some(previous) = previous {
        changes.deleted = previous
            .units
            .iter()
            .filter(|u| desired.unit(&u.name).is_none())
            .map(|u| u.name.clone())
            .collect();
    }

    changes
}

fn drop_in_changes(unit: &Unit, current: &ObservedUnit, last_applied: Option<&Unit>) -> DropInChanges {
    let changed = unit
        .drop_ins
        .iter()
        .filter(|d| current.drop_ins.get(&d.name) != Some(&d.content))
        .cloned()
        .collect();

    let deleted = last_applied
        .map(|last| {
            last.drop_ins
                .iter()
                .filter(|d| unit.drop_in(&d.name).is_none())
                .map(|d| d.name.clone())
                .collect()
        })
        .unwrap_or_default();

    DropInChanges { changed, deleted }
}
