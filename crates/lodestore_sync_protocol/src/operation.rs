//! Sync operations.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Kind of pending local mutation.
///
/// Serialized as the HTTP method used to push it, which is how sync log
/// entries are stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SyncOperation {
    /// Entity was created locally.
    #[serde(rename = "POST")]
    Create,
    /// Entity was updated locally.
    #[serde(rename = "PUT")]
    Update,
    /// Entity was deleted locally.
    #[serde(rename = "DELETE")]
    Delete,
}

impl SyncOperation {
    /// Returns the HTTP method used to push this operation.
    pub fn method(&self) -> &'static str {
        match self {
            SyncOperation::Create => "POST",
            SyncOperation::Update => "PUT",
            SyncOperation::Delete => "DELETE",
        }
    }

    /// Parses an HTTP method name.
    pub fn from_method(method: &str) -> Option<Self> {
        match method {
            "POST" => Some(SyncOperation::Create),
            "PUT" => Some(SyncOperation::Update),
            "DELETE" => Some(SyncOperation::Delete),
            _ => None,
        }
    }
}

impl fmt::Display for SyncOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.method())
    }
}
