//! Storage error types.

use thiserror::Error;

/// Errors that can occur during storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The requested object was not found.
    #[error("object not found: {0}")]
    NotFound(String),

    /// Stored bytes no longer hash to their content id.
    #[error("corruption detected: {0}")]
    Corruption(String),

    /// The object exists but is of a different kind.
    #[error("object {id} is a {actual}, expected a {expected}")]
    WrongKind {
        id: String,
        expected: &'static str,
        actual: &'static str,
    },

    /// The object could not be parsed.
    #[error("invalid object: {0}")]
    InvalidObject(String),

    /// Compression or decompression failed.
    #[error("compression error: {0}")]
    Compression(String),

    /// Encoding a tree or commit failed.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl StorageError {
    /// Classifies this error.
    pub fn kind(&self) -> eng_types::ErrorKind {
        match self {
            StorageError::NotFound(_) => eng_types::ErrorKind::NotFound,
            _ => eng_types::ErrorKind::Internal,
        }
    }
}
