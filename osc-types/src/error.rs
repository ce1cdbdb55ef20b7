//! Error types for the OSC wire format.

use thiserror::Error;

/// Errors that can occur while parsing or decoding a desired configuration.
#[derive(Debug, Error)]
pub enum OscError {
    /// JSON deserialization failed
    #[error("deserialization failed: {0}")]
    Deserialization(#[source] serde_json::Error),

    /// JSON serialization failed
    #[error("serialization failed: {0}")]
    Serialization(#[source] serde_json::Error),

    /// Inline content could not be decoded with its declared encoding
    #[error("unable to decode content of file {path:?}: {reason}")]
    Decode {
        /// Path of the file whose content is malformed.
        path: String,
        /// Decoder error message.
        reason: String,
    },

    /// The same identity appears more than once
    #[error("duplicate {kind} {name:?}")]
    Duplicate {
        /// Kind of entity ("file", "unit", "drop-in").
        kind: &'static str,
        /// The duplicated identity.
        name: String,
    },

    /// A path or name is not acceptable
    #[error("invalid {kind} {name:?}: {reason}")]
    InvalidName {
        /// Kind of entity ("file", "unit", "drop-in").
        kind: &'static str,
        /// The offending value.
        name: String,
        /// Why it was rejected.
        reason: &'static str,
    },

    /// File permissions outside the Unix mode bits
    #[error("invalid permissions {mode:#o} of file {path:?}")]
    InvalidPermissions {
        /// Path of the file.
        path: String,
        /// The declared permissions.
        mode: u32,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        let err = OscError::Duplicate {
            kind: "unit",
            name: "foo.service".into(),
        };
        assert_eq!(err.to_string(), "duplicate unit \"foo.service\"");
    }

    #[test]
    fn error_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<OscError>();
    }
}
