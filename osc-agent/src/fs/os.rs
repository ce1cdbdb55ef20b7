//! Filesystem backed by the host through `tokio::fs`.

use async_trait::async_trait;
use std::os::unix::fs::PermissionsExt;
use std::path::{Component, Path, PathBuf};
use tokio::io::AsyncWriteExt;

use super::{Filesystem, FsError};

/// Host filesystem, optionally re-rooted below a directory.
///
/// With a root, `/etc/app.conf` resolves to `<root>/etc/app.conf`. Paths
/// returned by [`Filesystem::create_temp_dir`] stay relative to the root so
/// they can be passed back in.
#[derive(Debug, Clone, Default)]
pub struct OsFilesystem {
    root: Option<PathBuf>,
}

impl OsFilesystem {
    /// Operate on the real `/`.
    pub fn new() -> Self {
        Self::default()
    }

    /// Re-root every path below `root`.
    pub fn rooted(root: impl Into<PathBuf>) -> Self {
        Self {
            root: Some(root.into()),
        }
    }

    fn resolve(&self, path: &Path) -> PathBuf {
        match &self.root {
            None => path.to_path_buf(),
            Some(root) => {
                let relative: PathBuf = path
                    .components()
                    .filter(|c| !matches!(c, Component::RootDir | Component::Prefix(_)))
                    .collect();
                root.join(relative)
            }
        }
    }
}

#[async_trait]
impl Filesystem for OsFilesystem {
    async fn read_file(&self, path: &Path) -> Result<Vec<u8>, FsError> {
        tokio::fs::read(self.resolve(path))
            .await
            .map_err(|e| FsError::from_io("read", path, e))
    }

    async fn write_file(&self, path: &Path, data: &[u8], mode: u32) -> Result<(), FsError> {
        let target = self.resolve(path);
        // mode only applies when the file is created
        let mut file = tokio::fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(mode)
            .open(&target)
            .await
            .map_err(|e| FsError::from_io("write", path, e))?;
        file.write_all(data)
            .await
            .map_err(|e| FsError::from_io("write", path, e))?;
        file.flush()
            .await
            .map_err(|e| FsError::from_io("write", path, e))?;
        drop(file);

        tokio::fs::set_permissions(&target, std::fs::Permissions::from_mode(mode))
            .await
            .map_err(|e| FsError::from_io("chmod", path, e))
    }

    async fn create_dir_all(&self, path: &Path) -> Result<(), FsError> {
        tokio::fs::create_dir_all(self.resolve(path))
            .await
            .map_err(|e| FsError::from_io("mkdir", path, e))
    }

    async fn rename(&self, from: &Path, to: &Path) -> Result<(), FsError> {
        tokio::fs::rename(self.resolve(from), self.resolve(to))
            .await
            .map_err(|e| FsError::from_io("rename", from, e))
    }

    async fn remove_file(&self, path: &Path) -> Result<(), FsError> {
        tokio::fs::remove_file(self.resolve(path))
            .await
            .map_err(|e| FsError::from_io("remove", path, e))
    }

    async fn remove_dir_all(&self, path: &Path) -> Result<(), FsError> {
        tokio::fs::remove_dir_all(self.resolve(path))
            .await
            .map_err(|e| FsError::from_io("remove-all", path, e))
    }

    async fn set_permissions(&self, path: &Path, mode: u32) -> Result<(), FsError> {
        tokio::fs::set_permissions(self.resolve(path), std::fs::Permissions::from_mode(mode))
            .await
            .map_err(|e| FsError::from_io("chmod", path, e))
    }

    async fn mode(&self, path: &Path) -> Result<u32, FsError> {
        let metadata = tokio::fs::metadata(self.resolve(path))
            .await
            .map_err(|e| FsError::from_io("stat", path, e))?;
        Ok(metadata.permissions().mode() & 0o7777)
    }

    async fn create_temp_dir(&self, parent: &Path, prefix: &str) -> Result<PathBuf, FsError> {
        self.create_dir_all(parent).await?;

        let host_parent = self.resolve(parent);
        let prefix = prefix.to_string();
        let created = tokio::task::spawn_blocking(move || {
            tempfile::Builder::new()
                .prefix(&prefix)
                .tempdir_in(host_parent)
                .map(tempfile::TempDir::keep)
        })
        .await
        .map_err(|e| FsError::from_io("mkdir", parent, std::io::Error::other(e)))?
        .map_err(|e| FsError::from_io("mkdir", parent, e))?;

        // hand back a path relative to the root
        match created.file_name() {
            Some(name) => Ok(parent.join(name)),
            None => Err(FsError::from_io(
                "mkdir",
                parent,
                std::io::Error::other("temporary directory has no name"),
            )),
        }
    }
}
