//! Error types for the iplog worker
//!
//! This module defines all error types used throughout the crate.

use thiserror::Error;

/// Result type alias for iplog operations
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for the iplog worker
#[derive(Error, Debug)]
pub enum Error {
    /// The scanned log file is missing or unreadable
    #[error("File unavailable ({path}): {reason}")]
    FileUnavailable {
        /// Path that was scanned
        path: String,
        /// Why it could not be read
        reason: String,
    },

    /// The storage backend cannot be reached right now
    #[error("Storage unavailable: {0}")]
    StorageUnavailable(String),

    /// A concurrent writer won the race on a unique key
    #[error("Duplicate key: {0}")]
    DuplicateKey(String),

    /// Non-recoverable storage errors
    #[error("Storage error: {0}")]
    Storage(String),

    /// A bounded operation did not finish in time
    #[error("Timed out: {0}")]
    Timeout(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Generic error with context
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Create a file-unavailable error
    pub fn file_unavailable(path: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::FileUnavailable {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Create a storage-unavailable error
    pub fn storage_unavailable(msg: impl Into<String>) -> Self {
        Self::StorageUnavailable(msg.into())
    }

    /// Create a duplicate key error
    pub fn duplicate_key(msg: impl Into<String>) -> Self {
        Self::DuplicateKey(msg.into())
    }

    /// Create a storage error
    pub fn storage(msg: impl Into<String>) -> Self {
        Self::Storage(msg.into())
    }

    /// Create a timeout error
    pub fn timeout(msg: impl Into<String>) -> Self {
        Self::Timeout(msg.into())
    }

    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Whether retrying the same operation may succeed
    ///
    /// Duplicate keys count as transient: the losing upsert of a race
    /// becomes an update on the next attempt.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::StorageUnavailable(_) | Self::DuplicateKey(_) | Self::Timeout(_)
        )
    }
}

/// Helper for converting anyhow::Error to our Error type
impl From<anyhow::Error> for Error {
    fn from(err: anyhow::Error) -> Self {
        Self::Other(err.to_string())
    }
}
