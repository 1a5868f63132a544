//! Error types for the sync engine.

use lodestore_storage::StorageError;
use lodestore_sync_protocol::{ErrorBody, ProtocolError};
use serde_json::Value;
use thiserror::Error;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Backend error names that mean the addressed entity or collection is gone.
const NOT_FOUND_NAMES: &[&str] = &[
    "EntityNotFound",
    "CollectionNotFound",
    "AppNotFound",
    "UserNotFound",
    "BlobNotFound",
    "DocumentNotFound",
    "NotFoundError",
];

/// Backend error names that mean a delta-set request can't be served.
const DELTA_UNAVAILABLE_NAMES: &[&str] = &[
    "FeatureUnavailable",
    "ParameterValueOutOfRange",
    "MissingConfiguration",
    "ResultSetSizeExceeded",
];

/// Errors that can occur during sync operations.
#[derive(Error, Debug)]
pub enum SyncError {
    /// The entity is absent locally or on the backend.
    #[error("not found: {0}")]
    NotFound(String),

    /// An entity is missing a required `_id`.
    #[error("invalid entity: {0}")]
    InvalidEntity(String),

    /// A push is already running for the same collection and tag.
    #[error("push already in progress for {0}")]
    SyncInProgress(String),

    /// A pull was attempted while local mutations are waiting to be pushed.
    #[error("{count} pending sync entities must be pushed before pulling")]
    PendingSyncConflict {
        /// Number of pending entries that block the pull.
        count: usize,
    },

    /// The backend could not be reached.
    #[error("network unavailable: {0}")]
    NetworkUnavailable(String),

    /// The request did not complete within the configured timeout.
    #[error("request timed out")]
    Timeout,

    /// The backend failed with a 5xx status.
    #[error("server error {status}: {message}")]
    ServerError {
        /// HTTP status code.
        status: u16,
        /// Error description from the backend.
        message: String,
    },

    /// The backend can't serve a delta set for this query.
    ///
    /// Pulls fall back to another strategy; callers never see this error.
    #[error("delta set unavailable: {0}")]
    DeltaSetUnavailable(String),

    /// Any other non-2xx response.
    #[error("request failed with status {status} ({name}): {message}")]
    Request {
        /// HTTP status code.
        status: u16,
        /// Backend error name.
        name: String,
        /// Error description from the backend.
        message: String,
    },

    /// A response body or stored record was malformed.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// A query could not be encoded or decoded.
    #[error("invalid query: {0}")]
    InvalidQuery(String),

    /// Invalid store or datastore configuration.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// Local storage failed.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// A background sync task ended without producing a result.
    #[error("sync task failed: {0}")]
    TaskFailed(String),
}

impl SyncError {
    /// Maps a non-2xx response to an error.
    ///
    /// The backend error name wins over the status code.
    pub fn from_response(status: u16, body: &Value) -> Self {
        let parsed: ErrorBody = serde_json::from_value(body.clone()).unwrap_or_default();
        let name = parsed.error.unwrap_or_default();
        let message = parsed
            .description
            .unwrap_or_else(|| format!("status {status}"));

        if NOT_FOUND_NAMES.contains(&name.as_str()) {
            return SyncError::NotFound(message);
        }
        if DELTA_UNAVAILABLE_NAMES.contains(&name.as_str()) {
            return SyncError::DeltaSetUnavailable(message);
        }

        match status {
            404 => SyncError::NotFound(message),
            500..=599 => SyncError::ServerError { status, message },
            _ => SyncError::Request {
                status,
                name,
                message,
            },
        }
    }

    /// Returns true if this error can be retried.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            SyncError::NetworkUnavailable(_) | SyncError::Timeout | SyncError::ServerError { .. }
        )
    }

    /// Returns true if this is [`SyncError::NotFound`].
    pub fn is_not_found(&self) -> bool {
        matches!(self, SyncError::NotFound(_))
    }
}

impl From<ProtocolError> for SyncError {
    fn from(err: ProtocolError) -> Self {
        match err {
            ProtocolError::InvalidQuery(message) => SyncError::InvalidQuery(message),
            other => SyncError::Protocol(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn retryable_errors() {
        assert!(SyncError::NetworkUnavailable("connection refused".into()).is_retryable());
        assert!(SyncError::Timeout.is_retryable());
        assert!(SyncError::ServerError {
            status: 503,
            message: "busy".into()
        }
        .is_retryable());
        assert!(!SyncError::NotFound("x".into()).is_retryable());
        assert!(!SyncError::SyncInProgress("books".into()).is_retryable());
    }

    #[test]
    fn maps_error_names_first() {
        let err = SyncError::from_response(400, &json!({"error": "EntityNotFound"}));
        assert!(err.is_not_found());

        let err = SyncError::from_response(
            400,
            &json!({"error": "ParameterValueOutOfRange", "description": "since too old"}),
        );
        assert!(matches!(err, SyncError::DeltaSetUnavailable(ref m) if m == "since too old"));

        let err = SyncError::from_response(403, &json!({"name": "FeatureUnavailable"}));
        assert!(matches!(err, SyncError::DeltaSetUnavailable(_)));
    }

    #[test]
    fn maps_status_codes() {
        assert!(SyncError::from_response(404, &Value::Null).is_not_found());
        assert!(matches!(
            SyncError::from_response(502, &json!({"description": "bad gateway"})),
            SyncError::ServerError { status: 502, .. }
        ));

        let err = SyncError::from_response(
            401,
            &json!({"error": "InsufficientCredentials", "description": "no session"}),
        );
        match err {
            SyncError::Request {
                status,
                name,
                message,
            } => {
                assert_eq!(status, 401);
                assert_eq!(name, "InsufficientCredentials");
                assert_eq!(message, "no session");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn error_display() {
        let err = SyncError::PendingSyncConflict { count: 3 };
        assert_eq!(
            err.to_string(),
            "3 pending sync entities must be pushed before pulling"
        );
        assert_eq!(SyncError::Timeout.to_string(), "request timed out");
    }

    #[test]
    fn protocol_errors_convert() {
        let err: SyncError = ProtocolError::InvalidQuery("bad".into()).into();
        assert!(matches!(err, SyncError::InvalidQuery(_)));

        let err: SyncError = ProtocolError::InvalidRecord("bad".into()).into();
        assert!(matches!(err, SyncError::Protocol(_)));
    }
}
