//! Error types for protocol operations.

use thiserror::Error;

/// Result type for protocol operations.
pub type ProtocolResult<T> = Result<T, ProtocolError>;

/// Errors that can occur while building or decoding protocol values.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// A query or query parameter is malformed.
    #[error("invalid query: {0}")]
    InvalidQuery(String),

    /// A stored record does not have the expected shape.
    #[error("invalid record: {0}")]
    InvalidRecord(String),

    /// JSON encoding or decoding failed.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}
