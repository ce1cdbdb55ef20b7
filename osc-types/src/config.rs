//! The desired operating system config of a node.
//!
//! An [`OperatingSystemConfig`] is a fully resolved list of files and systemd
//! units. It is decoded fresh on every reconciliation pass and never mutated
//! in place.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::{Encoding, OscError};

/// Permissions applied to files and units that do not declare any.
pub const DEFAULT_FILE_PERMISSIONS: u32 = 0o600;

// setuid, setgid, sticky and rwx bits
const MAX_FILE_PERMISSIONS: u32 = 0o7777;

/// Desired files and units of a node.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperatingSystemConfig {
    /// Files to be written to their absolute paths.
    #[serde(default)]
    pub files: Vec<File>,
    /// systemd units to be installed and controlled.
    #[serde(default)]
    pub units: Vec<Unit>,
}

impl OperatingSystemConfig {
    /// Decode and validate a config from its raw JSON bytes.
    pub fn from_slice(raw: &[u8]) -> Result<Self, OscError> {
        let config: Self = serde_json::from_slice(raw).map_err(OscError::Deserialization)?;
        config.validate()?;
        Ok(config)
    }

    /// Encode this config as JSON bytes.
    pub fn to_vec(&self) -> Result<Vec<u8>, OscError> {
        serde_json::to_vec(self).map_err(OscError::Serialization)
    }

    /// Look up a file by path.
    pub fn file(&self, path: &str) -> Option<&File> {
        self.files.iter().find(|f| f.path == path)
    }

    /// Look up a unit by name.
    pub fn unit(&self, name: &str) -> Option<&Unit> {
        self.units.iter().find(|u| u.name == name)
    }

    /// Check identity uniqueness and name shape of every entry.
    pub fn validate(&self) -> Result<(), OscError> {
        let mut paths = HashSet::new();
        for file in &self.files {
            if !file.path.starts_with('/') {
                return Err(OscError::InvalidName {
                    kind: "file",
                    name: file.path.clone(),
                    reason: "path must be absolute",
                });
            }
            if file.path.split('/').any(|segment| segment == "..") {
                return Err(OscError::InvalidName {
                    kind: "file",
                    name: file.path.clone(),
                    reason: "path must not contain '..'",
                });
            }
            if let Some(mode) = file.permissions.filter(|mode| *mode > MAX_FILE_PERMISSIONS) {
                return Err(OscError::InvalidPermissions {
                    path: file.path.clone(),
                    mode,
                });
            }
            if !paths.insert(file.path.as_str()) {
                return Err(OscError::Duplicate {
                    kind: "file",
                    name: file.path.clone(),
                });
            }
        }

        let mut units = HashSet::new();
        for unit in &self.units {
            check_plain_name("unit", &unit.name)?;
            if !units.insert(unit.name.as_str()) {
                return Err(OscError::Duplicate {
                    kind: "unit",
                    name: unit.name.clone(),
                });
            }

            let mut drop_ins = HashSet::new();
            for drop_in in &unit.drop_ins {
                check_plain_name("drop-in", &drop_in.name)?;
                if !drop_ins.insert(drop_in.name.as_str()) {
                    return Err(OscError::Duplicate {
                        kind: "drop-in",
                        name: format!("{}/{}", unit.name, drop_in.name),
                    });
                }
            }
        }

        Ok(())
    }
}

fn check_plain_name(kind: &'static str, name: &str) -> Result<(), OscError> {
    let reason = if name.is_empty() {
        "name must not be empty"
    } else if name == "." || name == ".." {
        "name must not be a relative directory"
    } else if name.contains('/') {
        "name must not contain '/'"
    } else {
        return Ok(());
    };

    Err(OscError::InvalidName {
        kind,
        name: name.to_string(),
        reason,
    })
}

/// A file managed on the node. Identity is the path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct File {
    /// Absolute path of the file.
    pub path: String,
    /// Unix mode bits, [`DEFAULT_FILE_PERMISSIONS`] when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub permissions: Option<u32>,
    /// Content of the file.
    #[serde(default)]
    pub content: FileContent,
}

impl File {
    /// Mode bits to apply to the file.
    pub fn mode(&self) -> u32 {
        self.permissions.unwrap_or(DEFAULT_FILE_PERMISSIONS)
    }

    /// Decode the inline content.
    ///
    /// Returns `Ok(None)` for files without an inline payload.
    pub fn decoded(&self) -> Result<Option<Vec<u8>>, OscError> {
        let Some(inline) = &self.content.inline else {
            return Ok(None);
        };

        inline
            .encoding
            .decode(&inline.data)
            .map(Some)
            .map_err(|reason| OscError::Decode {
                path: self.path.clone(),
                reason,
            })
    }
}

/// Content payload of a [`File`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileContent {
    /// Inline data; files without it are not written.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inline: Option<InlineContent>,
}

/// Inline file data with its transfer encoding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InlineContent {
    /// Encoding of `data`.
    #[serde(default)]
    pub encoding: Encoding,
    /// Encoded payload.
    pub data: String,
}

/// Explicit command for a unit after the service manager was reloaded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UnitCommand {
    /// The unit should be running.
    Start,
    /// The unit should be stopped.
    Stop,
}

/// Action issued for a changed unit once the service manager was reloaded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnitAction {
    /// Restart (or start) the unit.
    Restart,
    /// Stop the unit.
    Stop,
}

fn default_enable() -> bool {
    true
}

/// A systemd unit managed on the node. Identity is the name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Unit {
    /// Unit file name, e.g. `foo.service`.
    pub name: String,
    /// Unit file text. `None` leaves the unit file untouched and only
    /// manages enablement, command and drop-ins.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    /// Whether the unit is enabled. Defaults to `true` when absent.
    #[serde(default = "default_enable")]
    pub enable: bool,
    /// Explicit command, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<UnitCommand>,
    /// Drop-in override fragments, written to `<name>.d/`.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub drop_ins: Vec<DropIn>,
}

impl Unit {
    /// Create an enabled unit with the given content and no drop-ins.
    pub fn new(name: impl Into<String>, content: Option<String>) -> Self {
        Self {
            name: name.into(),
            content,
            enable: true,
            command: None,
            drop_ins: Vec::new(),
        }
    }

    /// Stop if disabled or explicitly told to stop, restart otherwise.
    pub fn action(&self) -> UnitAction {
        if !self.enable || self.command == Some(UnitCommand::Stop) {
            UnitAction::Stop
        } else {
            UnitAction::Restart
        }
    }

    /// Look up a drop-in by name.
    pub fn drop_in(&self, name: &str) -> Option<&DropIn> {
        self.drop_ins.iter().find(|d| d.name == name)
    }
}

/// A unit override fragment. Identity is (unit name, drop-in name).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DropIn {
    /// File name inside the unit's drop-in directory.
    pub name: String,
    /// Fragment text.
    pub content: String,
}

impl DropIn {
    /// Create a drop-in.
    pub fn new(name: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            content: content.into(),
        }
    }
}
