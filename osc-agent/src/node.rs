//! Node objects and their annotations.
//!
//! The agent records the checksum of the applied configuration as an
//! annotation on the node object it runs on. The convergence gate reads it
//! back on the next pass.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};
use thiserror::Error;

/// Node store errors.
#[derive(Debug, Error)]
pub enum NodeStoreError {
    /// The node is not registered.
    #[error("node {0:?} not found")]
    NotFound(String),

    /// Reading or writing the backing store failed.
    #[error("node store I/O error on {}: {source}", .path.display())]
    Io {
        /// Backing file.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// The backing store holds invalid data.
    #[error("invalid node store {}: {source}", .path.display())]
    Corrupt {
        /// Backing file.
        path: PathBuf,
        /// Parse error.
        source: serde_json::Error,
    },

    /// The store is temporarily unavailable.
    #[error("node store unavailable: {0}")]
    Unavailable(String),
}

/// Metadata of a node object.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Node {
    /// Node name.
    pub name: String,
    /// String-valued annotations.
    #[serde(default)]
    pub annotations: BTreeMap<String, String>,
}

impl Node {
    /// Create a node without annotations.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            annotations: BTreeMap::new(),
        }
    }

    /// Value of an annotation.
    pub fn annotation(&self, key: &str) -> Option<&str> {
        self.annotations.get(key).map(String::as_str)
    }
}

/// Access to node objects.
#[async_trait]
pub trait NodeStore: Send + Sync {
    /// Fetch a node, `None` if it is not registered.
    async fn get(&self, name: &str) -> Result<Option<Node>, NodeStoreError>;

    /// Merge annotations into an existing node.
    async fn annotate(
        &self,
        name: &str,
        annotations: &BTreeMap<String, String>,
    ) -> Result<(), NodeStoreError>;
}

/// Node objects kept in a local JSON file, keyed by name.
///
/// A missing file means no node is registered.
#[derive(Debug, Clone)]
pub struct LocalNodeStore {
    path: PathBuf,
}

impl LocalNodeStore {
    /// Use the JSON file at `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    async fn load(&self) -> Result<BTreeMap<String, Node>, NodeStoreError> {
        let raw = match tokio::fs::read(&self.path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(BTreeMap::new()),
            Err(e) => {
                return Err(NodeStoreError::Io {
                    path: self.path.clone(),
                    source: e,
                })
            }
        };

        serde_json::from_slice(&raw).map_err(|e| NodeStoreError::Corrupt {
            path: self.path.clone(),
            source: e,
        })
    }

    async fn save(&self, nodes: &BTreeMap<String, Node>) -> Result<(), NodeStoreError> {
        let raw = serde_json::to_vec_pretty(nodes).map_err(|e| NodeStoreError::Corrupt {
            path: self.path.clone(),
            source: e,
        })?;

        let mut tmp = self.path.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);

        tokio::fs::write(&tmp, raw)
            .await
            .map_err(|e| NodeStoreError::Io {
                path: tmp.clone(),
                source: e,
            })?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .map_err(|e| NodeStoreError::Io {
                path: self.path.clone(),
                source: e,
            })
    }

    /// Register a node without annotations if it does not exist.
    ///
    /// Creates the parent directory of the store on first use.
    pub async fn register(&self, name: &str) -> Result<(), NodeStoreError> {
        let mut nodes = self.load().await?;
        if nodes.contains_key(name) {
            return Ok(());
        }
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| NodeStoreError::Io {
                    path: parent.to_path_buf(),
                    source: e,
                })?;
        }
        nodes.insert(name.to_string(), Node::new(name));
        self.save(&nodes).await
    }
}

#[async_trait]
impl NodeStore for LocalNodeStore {
    async fn get(&self, name: &str) -> Result<Option<Node>, NodeStoreError> {
        Ok(self.load().await?.remove(name))
    }

    async fn annotate(
        &self,
        name: &str,
        annotations: &BTreeMap<String, String>,
    ) -> Result<(), NodeStoreError> {
        let mut nodes = self.load().await?;
        let node = nodes
            .get_mut(name)
            .ok_or_else(|| NodeStoreError::NotFound(name.to_string()))?;
        node.annotations
            .extend(annotations.iter().map(|(k, v)| (k.clone(), v.clone())));
        self.save(&nodes).await
    }
}

/// In-memory node store for testing.
#[derive(Debug, Clone, Default)]
pub struct MemoryNodeStore {
    inner: Arc<Mutex<MemoryNodeStoreInner>>,
}

#[derive(Debug, Default)]
struct MemoryNodeStoreInner {
    nodes: BTreeMap<String, Node>,
    fail_next_get: Option<String>,
    fail_next_annotate: Option<String>,
}

impl MemoryNodeStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a node.
    pub fn register(&self, node: Node) {
        self.lock().nodes.insert(node.name.clone(), node);
    }

    /// Snapshot of a node.
    pub fn node(&self, name: &str) -> Option<Node> {
        self.lock().nodes.get(name).cloned()
    }

    /// Cause the next `get()` to fail with the given error.
    pub fn fail_next_get(&self, error: &str) {
        self.lock().fail_next_get = Some(error.to_string());
    }

    /// Cause the next `annotate()` to fail with the given error.
    pub fn fail_next_annotate(&self, error: &str) {
        self.lock().fail_next_annotate = Some(error.to_string());
    }

    fn lock(&self) -> MutexGuard<'_, MemoryNodeStoreInner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl NodeStore for MemoryNodeStore {
    async fn get(&self, name: &str) -> Result<Option<Node>, NodeStoreError> {
        let mut inner = self.lock();
        if let Some(error) = inner.fail_next_get.take() {
            return Err(NodeStoreError::Unavailable(error));
        }
        Ok(inner.nodes.get(name).cloned())
    }

    async fn annotate(
        &self,
        name: &str,
        annotations: &BTreeMap<String, String>,
    ) -> Result<(), NodeStoreError> {
        let mut inner = self.lock();
        if let Some(error) = inner.fail_next_annotate.take() {
            return Err(NodeStoreError::Unavailable(error));
        }
        let node = inner
            .nodes
            .get_mut(name)
            .ok_or_else(|| NodeStoreError::NotFound(name.to_string()))?;
        node.annotations
            .extend(annotations.iter().map(|(k, v)| (k.clone(), v.clone())));
        Ok(())
    }
}
