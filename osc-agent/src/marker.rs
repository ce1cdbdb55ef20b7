//! Last-applied configuration marker.
//!
//! After a fully successful apply, the raw bytes of the desired
//! configuration are persisted at a well-known path. The next pass decodes
//! them as the previous configuration, which is the only source for
//! deletions.

use osc_types::{Checksum, OperatingSystemConfig, OscError};
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::fs::{ignore_not_found, Filesystem, FsError};

/// Default marker location.
pub const DEFAULT_MARKER_PATH: &str = "/var/lib/osc-agent/last-applied-osc.json";

/// Permission bits of the marker file.
pub const MARKER_MODE: u32 = 0o644;

/// Marker errors.
#[derive(Debug, Error)]
pub enum MarkerError {
    /// Reading the marker failed.
    #[error("failed reading marker {}: {source}", .path.display())]
    Read {
        /// Marker path.
        path: PathBuf,
        /// Underlying error.
        source: FsError,
    },

    /// Writing the marker failed.
    #[error("failed writing marker {}: {source}", .path.display())]
    Write {
        /// Path being written.
        path: PathBuf,
        /// Underlying error.
        source: FsError,
    },

    /// The marker exists but does not hold a valid configuration.
    #[error("corrupt marker {}: {source}", .path.display())]
    Corrupt {
        /// Marker path.
        path: PathBuf,
        /// Parse error.
        source: OscError,
    },
}

/// The last successfully applied configuration.
#[derive(Debug, Clone)]
pub struct LastApplied {
    /// Raw bytes as fetched from the source.
    pub raw: Vec<u8>,
    /// Decoded configuration.
    pub config: OperatingSystemConfig,
    /// Checksum recorded alongside, if any.
    pub checksum: Option<Checksum>,
}

/// Reads and writes the marker through a [`Filesystem`].
#[derive(Debug, Clone)]
pub struct MarkerStore {
    path: PathBuf,
}

impl Default for MarkerStore {
    fn default() -> Self {
        Self::new(DEFAULT_MARKER_PATH)
    }
}

impl MarkerStore {
    /// Use the marker at `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Marker path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Path of the checksum sidecar.
    pub fn checksum_path(&self) -> PathBuf {
        let mut name = self.path.clone().into_os_string();
        name.push(".sha256");
        PathBuf::from(name)
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self.path.clone().into_os_string();
        name.push(".tmp");
        PathBuf::from(name)
    }

    /// Load the marker, `None` if it does not exist.
    pub async fn load(&self, fs: &dyn Filesystem) -> Result<Option<LastApplied>, MarkerError> {
        let read_err = |path: &Path| {
            let path = path.to_path_buf();
            move |source| MarkerError::Read { path, source }
        };

        let Some(raw) = fs
            .read_if_exists(&self.path)
            .await
            .map_err(read_err(&self.path))?
        else {
            return Ok(None);
        };

        let config = OperatingSystemConfig::from_slice(&raw).map_err(|source| {
            MarkerError::Corrupt {
                path: self.path.clone(),
                source,
            }
        })?;

        let checksum_path = self.checksum_path();
        let checksum = fs
            .read_if_exists(&checksum_path)
            .await
            .map_err(read_err(&checksum_path))?
            .map(|bytes| String::from_utf8_lossy(&bytes).trim().to_string())
            .filter(|s| !s.is_empty())
            .map(Checksum::new);

        Ok(Some(LastApplied {
            raw,
            config,
            checksum,
        }))
    }

    /// Persist `raw` as the last applied configuration.
    ///
    /// The marker is replaced atomically. The sidecar is written after the
    /// marker, so a crash in between leaves a marker without checksum.
    pub async fn persist(
        &self,
        fs: &dyn Filesystem,
        raw: &[u8],
        checksum: &Checksum,
    ) -> Result<(), MarkerError> {
        if let Some(parent) = self.path.parent() {
            fs.create_dir_all(parent)
                .await
                .map_err(|source| MarkerError::Write {
                    path: parent.to_path_buf(),
                    source,
                })?;
        }

        let tmp = self.temp_path();
        let write_err = |path: PathBuf| move |source| MarkerError::Write { path, source };

        fs.write_file(&tmp, raw, MARKER_MODE)
            .await
            .map_err(write_err(tmp.clone()))?;
        if let Err(e) = fs.rename(&tmp, &self.path).await {
            if let Err(cleanup) = ignore_not_found(fs.remove_file(&tmp).await) {
                tracing::warn!(path = %tmp.display(), error = %cleanup, "Failed to remove temporary marker");
            }
            return Err(write_err(self.path.clone())(e));
        }

        let checksum_path = self.checksum_path();
        fs.write_file(&checksum_path, checksum.as_str().as_bytes(), MARKER_MODE)
            .await
            .map_err(write_err(checksum_path.clone()))?;

        tracing::debug!(path = %self.path.display(), checksum = %checksum, "Persisted last-applied marker");
        Ok(())
    }
}
