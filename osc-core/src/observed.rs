//! Snapshot of the node state relevant to a desired configuration.

use osc_types::OperatingSystemConfig;
use std::collections::BTreeMap;

/// What the agent found on the node before computing changes.
///
/// Only entries the agent manages are observed: the files and units named
/// by the desired configuration. Entries that disappeared from the desired
/// configuration are known through `previous`, never by scanning disk.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ObservedState {
    /// Last fully applied configuration, decoded from the convergence marker.
    pub previous: Option<OperatingSystemConfig>,
    /// Files present on disk, keyed by absolute path.
    pub files: BTreeMap<String, ObservedFile>,
    /// Installed units, keyed by unit name.
    pub units: BTreeMap<String, ObservedUnit>,
}

impl ObservedState {
    /// An empty node with no apply history.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the last applied configuration.
    pub fn with_previous(mut self, previous: OperatingSystemConfig) -> Self {
        self.previous = Some(previous);
        self
    }

    /// Record a file found on disk.
    pub fn with_file(mut self, path: impl Into<String>, content: &[u8], mode: u32) -> Self {
        self.files.insert(
            path.into(),
            ObservedFile {
                content: content.to_vec(),
                mode,
            },
        );
        self
    }

    /// Record an installed unit.
    pub fn with_unit(mut self, name: impl Into<String>, unit: ObservedUnit) -> Self {
        self.units.insert(name.into(), unit);
        self
    }
}

/// A regular file found on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObservedFile {
    /// Raw bytes.
    pub content: Vec<u8>,
    /// Permission bits (`0o7777` mask).
    pub mode: u32,
}

/// A unit as installed in the unit directory.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ObservedUnit {
    /// Unit file text, `None` when no unit file exists.
    pub content: Option<String>,
    /// Drop-in fragments found in `<name>.d/`, keyed by file name.
    pub drop_ins: BTreeMap<String, String>,
}

impl ObservedUnit {
    /// A unit file with the given text and no drop-ins.
    pub fn with_content(content: impl Into<String>) -> Self {
        Self {
            content: Some(content.into()),
            drop_ins: BTreeMap::new(),
        }
    }

    /// Record a drop-in fragment.
    pub fn with_drop_in(mut self, name: impl Into<String>, content: impl Into<String>) -> Self {
        self.drop_ins.insert(name.into(), content.into());
        self
    }
}
