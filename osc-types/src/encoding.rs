//! Transfer encodings of inline file content.

use base64::{engine::general_purpose::STANDARD, Engine};
use serde::{Deserialize, Serialize};

/// Encoding of [`InlineContent`](crate::InlineContent) data.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Encoding {
    /// Data is used as-is.
    #[default]
    #[serde(rename = "")]
    Plain,
    /// Data is standard base64.
    #[serde(rename = "b64", alias = "base64")]
    Base64,
}

impl Encoding {
    /// Decode `data` into the raw bytes to be written to disk.
    ///
    /// Returns the decoder's error message on malformed input.
    pub fn decode(self, data: &str) -> Result<Vec<u8>, String> {
        match self {
            Self::Plain => Ok(data.as_bytes().to_vec()),
            Self::Base64 => STANDARD
                .decode(data.trim_end())
                .map_err(|e| e.to_string()),
        }
    }
}
