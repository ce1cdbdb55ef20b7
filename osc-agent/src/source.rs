//! Desired-config sources.
//!
//! A source returns the raw bytes of the desired configuration together
//! with its checksum, or `None` when the resource does not exist.

use async_trait::async_trait;
use osc_types::Checksum;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use thiserror::Error;

/// Source errors.
#[derive(Debug, Error)]
pub enum SourceError {
    /// Reading the resource failed.
    #[error("unable to read desired config from {}: {source}", .path.display())]
    Read {
        /// Location of the resource.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// The source is temporarily unavailable.
    #[error("source unavailable: {0}")]
    Unavailable(String),
}

/// Raw desired configuration with its convergence key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedConfig {
    /// Encoded configuration bytes.
    pub raw: Vec<u8>,
    /// Checksum declared by the source.
    pub checksum: Checksum,
}

impl FetchedConfig {
    /// Wrap raw bytes, computing their checksum.
    pub fn from_raw(raw: Vec<u8>) -> Self {
        let checksum = Checksum::of(&raw);
        Self { raw, checksum }
    }
}

/// Where the desired configuration comes from.
#[async_trait]
pub trait ConfigSource: Send + Sync {
    /// Fetch the current desired configuration.
    ///
    /// Returns `Ok(None)` if the resource does not exist.
    async fn fetch(&self) -> Result<Option<FetchedConfig>, SourceError>;
}

/// Reads the desired configuration from a local file.
///
/// A sidecar `<path>.sha256` holds the declared checksum. Without it, the
/// checksum is computed from the file contents.
#[derive(Debug, Clone)]
pub struct FileSource {
    path: PathBuf,
}

impl FileSource {
    /// Read from `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Path of the declared-checksum sidecar.
    pub fn checksum_path(&self) -> PathBuf {
        let mut name = self.path.clone().into_os_string();
        name.push(".sha256");
        PathBuf::from(name)
    }
}

async fn read_optional(path: &Path) -> Result<Option<Vec<u8>>, SourceError> {
    match tokio::fs::read(path).await {
        Ok(data) => Ok(Some(data)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(SourceError::Read {
            path: path.to_path_buf(),
            source: e,
        }),
    }
}

#[async_trait]
impl ConfigSource for FileSource {
    async fn fetch(&self) -> Result<Option<FetchedConfig>, SourceError> {
        let Some(raw) = read_optional(&self.path).await? else {
            return Ok(None);
        };

        let declared = read_optional(&self.checksum_path())
            .await?
            .map(|bytes| String::from_utf8_lossy(&bytes).trim().to_string())
            .filter(|s| !s.is_empty());

        Ok(Some(match declared {
            Some(checksum) => FetchedConfig {
                raw,
                checksum: Checksum::new(checksum),
            },
            None => FetchedConfig::from_raw(raw),
        }))
    }
}

/// In-memory source for testing.
#[derive(Debug, Clone, Default)]
pub struct StaticSource {
    inner: Arc<Mutex<StaticSourceInner>>,
}

#[derive(Debug, Default)]
struct StaticSourceInner {
    config: Option<FetchedConfig>,
    fail_next: Option<String>,
}

impl StaticSource {
    /// A source whose resource does not exist.
    pub fn new() -> Self {
        Self::default()
    }

    /// A source serving `raw` with its computed checksum.
    pub fn with_raw(raw: impl Into<Vec<u8>>) -> Self {
        let source = Self::new();
        source.set(FetchedConfig::from_raw(raw.into()));
        source
    }

    /// Replace the served configuration.
    pub fn set(&self, config: FetchedConfig) {
        self.lock().config = Some(config);
    }

    /// Make the resource disappear.
    pub fn clear(&self) {
        self.lock().config = None;
    }

    /// Cause the next fetch to fail with the given error.
    pub fn fail_next(&self, error: &str) {
        self.lock().fail_next = Some(error.to_string());
    }

    fn lock(&self) -> MutexGuard<'_, StaticSourceInner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl ConfigSource for StaticSource {
    async fn fetch(&self) -> Result<Option<FetchedConfig>, SourceError> {
        let mut inner = self.lock();
        if let Some(error) = inner.fail_next.take() {
            return Err(SourceError::Unavailable(error));
        }
        Ok(inner.config.clone())
    }
}
