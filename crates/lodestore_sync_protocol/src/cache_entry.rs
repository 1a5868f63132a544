//! Query cache entries.

use crate::error::{ProtocolError, ProtocolResult};
use lodestore_storage::Document;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Timestamp of the last successful pull for one query signature.
///
/// There is at most one entry per `(collection_name, query)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryCacheEntry {
    /// Entry id.
    #[serde(rename = "_id")]
    pub id: String,
    /// Collection the query was pulled from.
    pub collection_name: String,
    /// Canonical query key; see [`crate::Query::cache_key`].
    pub query: String,
    /// Server timestamp of the request that produced the cached state.
    pub last_request: String,
}

impl QueryCacheEntry {
    /// Encodes the entry as a storable document.
    pub fn to_document(&self) -> ProtocolResult<Document> {
        match serde_json::to_value(self)? {
            Value::Object(doc) => Ok(doc),
            _ => Err(ProtocolError::InvalidRecord(
                "query cache entry did not encode to an object".to_string(),
            )),
        }
    }

    /// Decodes an entry from a stored document.
    pub fn from_document(doc: Document) -> ProtocolResult<Self> {
        Ok(serde_json::from_value(Value::Object(doc))?)
    }
}
