//! Storage adapter trait definition.

use crate::error::StorageResult;
use async_trait::async_trait;
use serde_json::{Map, Value};

/// Name of the primary key attribute every stored document carries.
pub const ID_ATTRIBUTE: &str = "_id";

/// A schemaless JSON document.
pub type Document = Map<String, Value>;

/// Returns the `_id` of a document, if it has a non-empty string one.
pub fn document_id(doc: &Document) -> Option<&str> {
    doc.get(ID_ATTRIBUTE)
        .and_then(Value::as_str)
        .filter(|id| !id.is_empty())
}

/// A low-level document storage adapter.
///
/// Adapters are **per-collection document stores**. Documents are keyed by
/// their `_id` attribute; everything else is opaque. The sync engine owns all
/// interpretation of metadata, sync logs and query caches.
///
/// # Invariants
///
/// - `save` upserts by `_id`; saving a document without `_id` is an error
/// - `find` returns every document in the collection
/// - `remove_by_id` and `clear` return the number of documents removed and
///   never fail because the collection is empty
/// - Adapters must be `Send + Sync`; callers serialize mutating access
///
/// # Implementors
///
/// - [`super::InMemoryAdapter`] - For testing
/// - [`super::FileAdapter`] - For persistent storage
#[async_trait]
pub trait StorageAdapter: Send + Sync {
    /// Returns the number of documents in a collection.
    async fn count(&self, namespace: &str, collection: &str) -> StorageResult<usize>;

    /// Returns every document in a collection.
    async fn find(&self, namespace: &str, collection: &str) -> StorageResult<Vec<Document>>;

    /// Returns the document with the given id, if present.
    async fn find_by_id(
        &self,
        namespace: &str,
        collection: &str,
        id: &str,
    ) -> StorageResult<Option<Document>>;

    /// Inserts or replaces documents by `_id`.
    ///
    /// Returns the saved documents.
    ///
    /// # Errors
    ///
    /// Returns [`crate::StorageError::MissingId`] if any document lacks `_id`;
    /// in that case nothing is written.
    async fn save(
        &self,
        namespace: &str,
        collection: &str,
        docs: Vec<Document>,
    ) -> StorageResult<Vec<Document>>;

    /// Removes the document with the given id.
    ///
    /// Returns 1 if a document was removed, 0 otherwise.
    async fn remove_by_id(&self, namespace: &str, collection: &str, id: &str)
        -> StorageResult<usize>;

    /// Removes every document in a collection.
    ///
    /// Returns the number of documents removed.
    async fn clear(&self, namespace: &str, collection: &str) -> StorageResult<usize>;

    /// Removes every collection in a namespace except those listed in `exclude`.
    async fn clear_all(&self, namespace: &str, exclude: &[String]) -> StorageResult<()>;
}
