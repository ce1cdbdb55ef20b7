//! # osc-types
//!
//! Wire format types for the operating system config (OSC) agent.
//!
//! This crate provides the foundational types used across all agent crates:
//! - [`OperatingSystemConfig`] - The desired files and systemd units of a node
//! - [`File`], [`Unit`], [`DropIn`] - Managed entities and their identities
//! - [`Encoding`] - Transfer encodings of inline file content
//! - [`Checksum`] - Convergence key of a desired configuration
//! - [`OscError`] - Error types

#![warn(missing_docs)]
#![warn(clippy::all)]

mod checksum;
mod config;
mod encoding;
mod error;

pub use checksum::Checksum;
pub use config::{
    DropIn, File, FileContent, InlineContent, OperatingSystemConfig, Unit, UnitAction,
    UnitCommand, DEFAULT_FILE_PERMISSIONS,
};
pub use encoding::Encoding;
pub use error::OscError;
