//! Wire bodies exchanged with the backend.

use lodestore_storage::Document;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Reference to a deleted document in a delta set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeletedRef {
    /// Id of the deleted document.
    #[serde(rename = "_id")]
    pub id: String,
}

/// Response body of a delta-set request.
///
/// Lists the documents changed and deleted since the `since` timestamp.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeltaSetResponse {
    /// Documents created or updated since the timestamp.
    #[serde(default)]
    pub changed: Vec<Document>,
    /// Documents deleted since the timestamp.
    #[serde(default)]
    pub deleted: Vec<DeletedRef>,
}

/// Response body of a count request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CountResponse {
    /// Number of matching documents.
    pub count: u64,
}

/// Body of a non-2xx response.
///
/// Backends name the error in `error` (or `name`) and explain it in
/// `description` (or `message`).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ErrorBody {
    /// Machine-readable error name, such as `EntityNotFound`.
    #[serde(default, alias = "name", skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Human-readable explanation.
    #[serde(default, alias = "message", skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Extra debugging detail.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub debug: Option<Value>,
}

impl ErrorBody {
    /// Creates an error body with a name and description.
    pub fn new(error: &str, description: &str) -> Self {
        Self {
            error: Some(error.to_string()),
            description: Some(description.to_string()),
            debug: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn delta_set_defaults_missing_lists() {
        let body: DeltaSetResponse = serde_json::from_value(json!({"changed": [{"_id": "a"}]})).unwrap();
        assert_eq!(body.changed.len(), 1);
        assert!(body.deleted.is_empty());

        let body: DeltaSetResponse =
            serde_json::from_value(json!({"deleted": [{"_id": "b"}]})).unwrap();
        assert_eq!(body.deleted, vec![DeletedRef { id: "b".to_string() }]);
    }

    #[test]
    fn error_body_accepts_aliases() {
        let body: ErrorBody =
            serde_json::from_value(json!({"name": "NotFoundError", "message": "gone"})).unwrap();
        assert_eq!(body.error.as_deref(), Some("NotFoundError"));
        assert_eq!(body.description.as_deref(), Some("gone"));

        let body: ErrorBody = serde_json::from_value(json!({})).unwrap();
        assert_eq!(body, ErrorBody::default());
    }

    #[test]
    fn count_body() {
        let body: CountResponse = serde_json::from_value(json!({"count": 42})).unwrap();
        assert_eq!(body.count, 42);
        assert!(serde_json::from_value::<CountResponse>(json!({"count": -1})).is_err());
    }
}
