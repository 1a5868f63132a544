//! Error types for storage operations.

use std::io;
use thiserror::Error;

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors that can occur during storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A collection file could not be encoded or decoded.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A document without `_id` was handed to `save`.
    #[error("document saved to collection {collection} has no _id")]
    MissingId {
        /// The target collection.
        collection: String,
    },

    /// A namespace or collection name cannot be used as a storage key.
    #[error("invalid storage name: {0:?}")]
    InvalidName(String),

    /// The stored data is not in the expected shape.
    #[error("storage corrupted: {0}")]
    Corrupted(String),
}
