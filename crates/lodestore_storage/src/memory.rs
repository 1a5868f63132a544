//! In-memory storage adapter for testing.

use crate::adapter::{document_id, Document, StorageAdapter};
use crate::error::{StorageError, StorageResult};
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};

type Collection = BTreeMap<String, Document>;

/// An in-memory storage adapter.
///
/// This adapter keeps every collection in memory and is suitable for:
/// - Unit tests
/// - Integration tests
/// - Ephemeral caches that don't need persistence
///
/// Each instance owns its own data; two adapters never share collections.
///
/// # Thread Safety
///
/// This adapter is thread-safe and can be shared across tasks.
#[derive(Debug, Default)]
pub struct InMemoryAdapter {
    collections: RwLock<HashMap<(String, String), Collection>>,
}

impl InMemoryAdapter {
    /// Creates a new empty in-memory adapter.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the names of the non-empty collections in a namespace.
    ///
    /// Useful for testing and debugging.
    #[must_use]
    pub fn collection_names(&self, namespace: &str) -> Vec<String> {
        let mut names: Vec<String> = self
            .collections
            .read()
            .iter()
            .filter(|((ns, _), docs)| ns == namespace && !docs.is_empty())
            .map(|((_, name), _)| name.clone())
            .collect();
        names.sort();
        names
    }
}

fn key(namespace: &str, collection: &str) -> (String, String) {
    (namespace.to_string(), collection.to_string())
}

#[async_trait]
impl StorageAdapter for InMemoryAdapter {
    async fn count(&self, namespace: &str, collection: &str) -> StorageResult<usize> {
        Ok(self
            .collections
            .read()
            .get(&key(namespace, collection))
            .map_or(0, BTreeMap::len))
    }

    async fn find(&self, namespace: &str, collection: &str) -> StorageResult<Vec<Document>> {
        Ok(self
            .collections
            .read()
            .get(&key(namespace, collection))
            .map(|docs| docs.values().cloned().collect())
            .unwrap_or_default())
    }

    async fn find_by_id(
        &self,
        namespace: &str,
        collection: &str,
        id: &str,
    ) -> StorageResult<Option<Document>> {
        Ok(self
            .collections
            .read()
            .get(&key(namespace, collection))
            .and_then(|docs| docs.get(id).cloned()))
    }

    async fn save(
        &self,
        namespace: &str,
        collection: &str,
        docs: Vec<Document>,
    ) -> StorageResult<Vec<Document>> {
        let mut keyed = Vec::with_capacity(docs.len());
        for doc in &docs {
            let id = document_id(doc).ok_or_else(|| StorageError::MissingId {
                collection: collection.to_string(),
            })?;
            keyed.push((id.to_string(), doc.clone()));
        }

        let mut collections = self.collections.write();
        let target = collections.entry(key(namespace, collection)).or_default();
        for (id, doc) in keyed {
            target.insert(id, doc);
        }

        Ok(docs)
    }

    async fn remove_by_id(
        &self,
        namespace: &str,
        collection: &str,
        id: &str,
    ) -> StorageResult<usize> {
        let mut collections = self.collections.write();
        let removed = collections
            .get_mut(&key(namespace, collection))
            .and_then(|docs| docs.remove(id));
        Ok(usize::from(removed.is_some()))
    }

    async fn clear(&self, namespace: &str, collection: &str) -> StorageResult<usize> {
        Ok(self
            .collections
            .write()
            .remove(&key(namespace, collection))
            .map_or(0, |docs| docs.len()))
    }

    async fn clear_all(&self, namespace: &str, exclude: &[String]) -> StorageResult<()> {
        self.collections
            .write()
            .retain(|(ns, name), _| ns != namespace || exclude.contains(name));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(value: serde_json::Value) -> Document {
        value.as_object().cloned().unwrap()
    }

    #[tokio::test]
    async fn memory_new_is_empty() {
        let adapter = InMemoryAdapter::new();
        assert_eq!(adapter.count("ns", "books").await.unwrap(), 0);
        assert!(adapter.find("ns", "books").await.unwrap().is_empty());
        assert!(adapter.collection_names("ns").is_empty());
    }

    #[tokio::test]
    async fn memory_save_upserts_by_id() {
        let adapter = InMemoryAdapter::new();
        adapter
            .save("ns", "books", vec![doc(json!({"_id": "1", "title": "a"}))])
            .await
            .unwrap();
        adapter
            .save("ns", "books", vec![doc(json!({"_id": "1", "title": "b"}))])
            .await
            .unwrap();

        assert_eq!(adapter.count("ns", "books").await.unwrap(), 1);
        let found = adapter.find_by_id("ns", "books", "1").await.unwrap().unwrap();
        assert_eq!(found["title"], "b");
    }

    #[tokio::test]
    async fn memory_save_without_id_writes_nothing() {
        let adapter = InMemoryAdapter::new();
        let result = adapter
            .save(
                "ns",
                "books",
                vec![doc(json!({"_id": "1"})), doc(json!({"title": "no id"}))],
            )
            .await;

        assert!(matches!(result, Err(StorageError::MissingId { .. })));
        assert_eq!(adapter.count("ns", "books").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn memory_remove_by_id_counts() {
        let adapter = InMemoryAdapter::new();
        adapter
            .save("ns", "books", vec![doc(json!({"_id": "1"}))])
            .await
            .unwrap();

        assert_eq!(adapter.remove_by_id("ns", "books", "1").await.unwrap(), 1);
        assert_eq!(adapter.remove_by_id("ns", "books", "1").await.unwrap(), 0);
        assert_eq!(adapter.remove_by_id("ns", "missing", "1").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn memory_namespaces_are_isolated() {
        let adapter = InMemoryAdapter::new();
        adapter
            .save("a", "books", vec![doc(json!({"_id": "1"}))])
            .await
            .unwrap();

        assert_eq!(adapter.count("b", "books").await.unwrap(), 0);
        assert_eq!(adapter.clear("b", "books").await.unwrap(), 0);
        assert_eq!(adapter.count("a", "books").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn memory_clear_all_respects_exclude() {
        let adapter = InMemoryAdapter::new();
        for name in ["books", "authors", "_QueryCache"] {
            adapter
                .save("ns", name, vec![doc(json!({"_id": "1"}))])
                .await
                .unwrap();
        }

        adapter
            .clear_all("ns", &["authors".to_string()])
            .await
            .unwrap();

        assert_eq!(adapter.collection_names("ns"), vec!["authors".to_string()]);
    }
}
