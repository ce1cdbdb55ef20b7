//! In-memory filesystem for testing.
//!
//! Keeps files and directories in ordered maps, records every mutation in
//! a [`Journal`] and allows forcing failures for specific paths.

use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use super::{Filesystem, FsError};
use crate::journal::{Effect, Journal};

/// In-memory filesystem for testing.
///
/// The root directory `/` always exists. Writing a file requires its parent
/// directory to exist, like on a real filesystem.
#[derive(Debug, Clone, Default)]
pub struct MemoryFilesystem {
    inner: Arc<Mutex<MemoryFilesystemInner>>,
    journal: Journal,
}

#[derive(Debug, Default)]
struct MemoryFilesystemInner {
    files: BTreeMap<PathBuf, MemoryFile>,
    dirs: BTreeSet<PathBuf>,
    fail_next: HashMap<PathBuf, String>,
    temp_counter: u64,
}

#[derive(Debug, Clone)]
struct MemoryFile {
    data: Vec<u8>,
    mode: u32,
}

impl MemoryFilesystem {
    /// Create an empty filesystem.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record mutations into a shared journal.
    pub fn with_journal(mut self, journal: Journal) -> Self {
        self.journal = journal;
        self
    }

    /// Seed a file (and its parents) without recording it.
    pub fn seed_file(&self, path: impl AsRef<Path>, data: &[u8], mode: u32) {
        let path = path.as_ref();
        let mut inner = self.lock();
        if let Some(parent) = path.parent() {
            inner.add_dirs(parent);
        }
        inner.files.insert(
            path.to_path_buf(),
            MemoryFile {
                data: data.to_vec(),
                mode,
            },
        );
    }

    /// Seed a directory (and its parents) without recording it.
    pub fn seed_dir(&self, path: impl AsRef<Path>) {
        self.lock().add_dirs(path.as_ref());
    }

    /// Contents of a file, if it exists.
    pub fn contents(&self, path: impl AsRef<Path>) -> Option<Vec<u8>> {
        self.lock().files.get(path.as_ref()).map(|f| f.data.clone())
    }

    /// Permission bits of a file, if it exists.
    pub fn file_mode(&self, path: impl AsRef<Path>) -> Option<u32> {
        self.lock().files.get(path.as_ref()).map(|f| f.mode)
    }

    /// True if the directory exists.
    pub fn dir_exists(&self, path: impl AsRef<Path>) -> bool {
        self.lock().dir_exists(path.as_ref())
    }

    /// All file paths below `dir`.
    pub fn files_under(&self, dir: impl AsRef<Path>) -> Vec<PathBuf> {
        let dir = dir.as_ref();
        self.lock()
            .files
            .keys()
            .filter(|p| p.starts_with(dir))
            .cloned()
            .collect()
    }

    /// Cause the next mutation of `path` to fail with the given error.
    pub fn fail_next(&self, path: impl AsRef<Path>, error: &str) {
        self.lock()
            .fail_next
            .insert(path.as_ref().to_path_buf(), error.to_string());
    }

    fn lock(&self) -> MutexGuard<'_, MemoryFilesystemInner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl MemoryFilesystemInner {
    fn dir_exists(&self, path: &Path) -> bool {
        path.parent().is_none() || self.dirs.contains(path)
    }

    fn add_dirs(&mut self, path: &Path) {
        for ancestor in path.ancestors() {
            if ancestor.parent().is_none() {
                break;
            }
            self.dirs.insert(ancestor.to_path_buf());
        }
    }

    fn check_failure(&mut self, op: &'static str, path: &Path) -> Result<(), FsError> {
        match self.fail_next.remove(path) {
            Some(error) => Err(FsError::Io {
                op,
                path: path.to_path_buf(),
                source: std::io::Error::other(error),
            }),
            None => Ok(()),
        }
    }

    fn require_parent(&self, path: &Path) -> Result<(), FsError> {
        match path.parent() {
            Some(parent) if !self.dir_exists(parent) => Err(FsError::NotFound {
                path: parent.to_path_buf(),
            }),
            _ => Ok(()),
        }
    }

    fn file_mut(&mut self, path: &Path) -> Result<&mut MemoryFile, FsError> {
        self.files.get_mut(path).ok_or_else(|| FsError::NotFound {
            path: path.to_path_buf(),
        })
    }
}

#[async_trait]
impl Filesystem for MemoryFilesystem {
    async fn read_file(&self, path: &Path) -> Result<Vec<u8>, FsError> {
        self.lock()
            .files
            .get(path)
            .map(|f| f.data.clone())
            .ok_or_else(|| FsError::NotFound {
                path: path.to_path_buf(),
            })
    }

    async fn write_file(&self, path: &Path, data: &[u8], mode: u32) -> Result<(), FsError> {
        let mut inner = self.lock();
        inner.check_failure("write", path)?;
        inner.require_parent(path)?;
        inner.files.insert(
            path.to_path_buf(),
            MemoryFile {
                data: data.to_vec(),
                mode,
            },
        );
        self.journal.record(Effect::Write(path.to_path_buf()));
        Ok(())
    }

    async fn create_dir_all(&self, path: &Path) -> Result<(), FsError> {
        let mut inner = self.lock();
        inner.check_failure("mkdir", path)?;
        if !inner.dir_exists(path) {
            inner.add_dirs(path);
            self.journal.record(Effect::CreateDir(path.to_path_buf()));
        }
        Ok(())
    }

    async fn rename(&self, from: &Path, to: &Path) -> Result<(), FsError> {
        let mut inner = self.lock();
        inner.check_failure("rename", to)?;
        inner.require_parent(to)?;
        let file = inner.files.remove(from).ok_or_else(|| FsError::NotFound {
            path: from.to_path_buf(),
        })?;
        inner.files.insert(to.to_path_buf(), file);
        self.journal.record(Effect::Rename {
            from: from.to_path_buf(),
            to: to.to_path_buf(),
        });
        Ok(())
    }

    async fn remove_file(&self, path: &Path) -> Result<(), FsError> {
        let mut inner = self.lock();
        inner.check_failure("remove", path)?;
        inner.files.remove(path).ok_or_else(|| FsError::NotFound {
            path: path.to_path_buf(),
        })?;
        self.journal.record(Effect::Remove(path.to_path_buf()));
        Ok(())
    }

    async fn remove_dir_all(&self, path: &Path) -> Result<(), FsError> {
        let mut inner = self.lock();
        inner.check_failure("remove-all", path)?;
        if !inner.dirs.contains(path) {
            return Err(FsError::NotFound {
                path: path.to_path_buf(),
            });
        }
        inner.files.retain(|p, _| !p.starts_with(path));
        inner.dirs.retain(|p| !p.starts_with(path));
        self.journal.record(Effect::RemoveAll(path.to_path_buf()));
        Ok(())
    }

    async fn set_permissions(&self, path: &Path, mode: u32) -> Result<(), FsError> {
        let mut inner = self.lock();
        inner.check_failure("chmod", path)?;
        inner.file_mut(path)?.mode = mode;
        self.journal.record(Effect::Chmod(path.to_path_buf(), mode));
        Ok(())
    }

    async fn mode(&self, path: &Path) -> Result<u32, FsError> {
        let mut inner = self.lock();
        Ok(inner.file_mut(path)?.mode & 0o7777)
    }

    async fn create_temp_dir(&self, parent: &Path, prefix: &str) -> Result<PathBuf, FsError> {
        let mut inner = self.lock();
        inner.check_failure("mkdir", parent)?;
        inner.temp_counter += 1;
        let dir = parent.join(format!("{prefix}{}", inner.temp_counter));
        inner.add_dirs(&dir);
        self.journal.record(Effect::CreateDir(dir.clone()));
        Ok(dir)
    }
}
