//! Convergence key of a desired configuration.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// Checksum of the canonical encoded bytes of a desired configuration.
///
/// Sources may declare their own checksum, which is trusted verbatim. When
/// none is declared, [`Checksum::of`] computes a lowercase hex SHA-256.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Checksum(String);

impl Checksum {
    /// Wrap a checksum declared by the config source.
    pub fn new(declared: impl Into<String>) -> Self {
        Self(declared.into())
    }

    /// Compute the SHA-256 checksum of raw bytes.
    pub fn of(bytes: &[u8]) -> Self {
        let digest = Sha256::digest(bytes);
        Self(hex::encode(digest))
    }

    /// Get the checksum as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Checksum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for Checksum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let short = self.0.get(..12).unwrap_or(&self.0);
        write!(f, "Checksum({short})")
    }
}
