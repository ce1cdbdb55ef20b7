//! Filesystem abstraction.
//!
//! The apply engine never touches `std::fs` directly. It goes through the
//! [`Filesystem`] trait so the same code drives the real node
//! ([`OsFilesystem`]) and in-memory tests ([`MemoryFilesystem`]).
//!
//! # Design
//!
//! Paths are absolute, as they appear in the desired configuration.
//! Not-found is reported as [`FsError::NotFound`] so deletions can treat it
//! as success.

mod memory;
mod os;

pub use memory::MemoryFilesystem;
pub use os::OsFilesystem;

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Filesystem errors.
#[derive(Debug, Error)]
pub enum FsError {
    /// The path does not exist.
    #[error("not found: {}", .path.display())]
    NotFound {
        /// The missing path.
        path: PathBuf,
    },

    /// Any other I/O failure.
    #[error("{op} failed for {}: {source}", .path.display())]
    Io {
        /// The failed operation.
        op: &'static str,
        /// The path operated on.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },
}

impl FsError {
    /// True if the error means the path does not exist.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    pub(crate) fn from_io(op: &'static str, path: &Path, source: std::io::Error) -> Self {
        if source.kind() == std::io::ErrorKind::NotFound {
            Self::NotFound {
                path: path.to_path_buf(),
            }
        } else {
            Self::Io {
                op,
                path: path.to_path_buf(),
                source,
            }
        }
    }
}

/// Treat not-found as success.
pub fn ignore_not_found(result: Result<(), FsError>) -> Result<(), FsError> {
    match result {
        Err(e) if e.is_not_found() => Ok(()),
        other => other,
    }
}

/// Hierarchical read/write/rename/remove operations over a rooted tree.
#[async_trait]
pub trait Filesystem: Send + Sync {
    /// Read a whole file.
    async fn read_file(&self, path: &Path) -> Result<Vec<u8>, FsError>;

    /// Create or truncate a file and set its permission bits.
    ///
    /// The parent directory must exist.
    async fn write_file(&self, path: &Path, data: &[u8], mode: u32) -> Result<(), FsError>;

    /// Create a directory and all missing parents.
    async fn create_dir_all(&self, path: &Path) -> Result<(), FsError>;

    /// Atomically move a file, replacing the target.
    async fn rename(&self, from: &Path, to: &Path) -> Result<(), FsError>;

    /// Remove a single file.
    async fn remove_file(&self, path: &Path) -> Result<(), FsError>;

    /// Remove a directory and everything below it.
    async fn remove_dir_all(&self, path: &Path) -> Result<(), FsError>;

    /// Set permission bits of an existing file.
    async fn set_permissions(&self, path: &Path, mode: u32) -> Result<(), FsError>;

    /// Permission bits (`0o7777` mask) of an existing file.
    async fn mode(&self, path: &Path) -> Result<u32, FsError>;

    /// Create a fresh, uniquely named directory below `parent`.
    async fn create_temp_dir(&self, parent: &Path, prefix: &str) -> Result<PathBuf, FsError>;

    /// Read a file, returning `None` if it does not exist.
    async fn read_if_exists(&self, path: &Path) -> Result<Option<Vec<u8>>, FsError> {
        match self.read_file(path).await {
            Ok(data) => Ok(Some(data)),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }
}
