//! Error types for metafs
//!
//! This module defines the common error type used across the
//! metadata-server crates.

use thiserror::Error;

/// Common result type for metafs operations
pub type Result<T> = std::result::Result<T, Error>;

/// Common error type for metafs
#[derive(Debug, Error)]
pub enum Error {
    #[error("object not found: {oid}")]
    ObjectNotFound { oid: String },

    #[error("storage error: {0}")]
    Storage(String),

    #[error("decode error: {0}")]
    Decode(String),

    #[error("write to {oid} failed: {reason}")]
    WriteFailed { oid: String, reason: String },
}

impl Error {
    /// Create a storage error
    pub fn storage(msg: impl Into<String>) -> Self {
        Self::Storage(msg.into())
    }

    /// Create a decode error
    pub fn decode(msg: impl Into<String>) -> Self {
        Self::Decode(msg.into())
    }

    /// Check if this is a not found error
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::ObjectNotFound { .. })
    }
}
