//! Local document cache.

use crate::error::{SyncError, SyncResult};
use crate::serial::StorageGuard;
use lodestore_storage::{document_id, Document};
use lodestore_sync_protocol::{ensure_id, Query};

/// The cached documents of one `(collection, tag)` pair.
///
/// Documents saved without `_id` get a generated id and `_kmd.local = true`.
#[derive(Debug, Clone)]
pub(crate) struct LocalCache {
    collection: String,
}

impl LocalCache {
    pub fn new(collection: String) -> Self {
        Self { collection }
    }

    pub async fn find(&self, storage: &StorageGuard<'_>, query: &Query) -> SyncResult<Vec<Document>> {
        let docs = storage.find(&self.collection).await?;
        Ok(query.process(docs))
    }

    pub async fn count(&self, storage: &StorageGuard<'_>, query: &Query) -> SyncResult<usize> {
        if query.is_empty() {
            return storage.count(&self.collection).await;
        }
        Ok(self.find(storage, query).await?.len())
    }

    pub async fn find_by_id(
        &self,
        storage: &StorageGuard<'_>,
        id: &str,
    ) -> SyncResult<Option<Document>> {
        storage.find_by_id(&self.collection, id).await
    }

    pub async fn save(
        &self,
        storage: &StorageGuard<'_>,
        mut docs: Vec<Document>,
    ) -> SyncResult<Vec<Document>> {
        for doc in &mut docs {
            ensure_id(doc);
        }
        storage.save(&self.collection, docs).await
    }

    /// Removes the documents matching `query` and returns them.
    pub async fn remove(
        &self,
        storage: &StorageGuard<'_>,
        query: &Query,
    ) -> SyncResult<Vec<Document>> {
        let docs = self.find(storage, query).await?;
        for doc in &docs {
            if let Some(id) = document_id(doc) {
                storage.remove_by_id(&self.collection, id).await?;
            }
        }
        Ok(docs)
    }

    pub async fn remove_by_id(&self, storage: &StorageGuard<'_>, id: &str) -> SyncResult<usize> {
        storage.remove_by_id(&self.collection, id).await
    }

    /// Removes every document, or only those matching a non-empty query.
    pub async fn clear(&self, storage: &StorageGuard<'_>, query: &Query) -> SyncResult<usize> {
        if query.is_empty() {
            return storage.clear(&self.collection).await;
        }
        Ok(self.remove(storage, query).await?.len())
    }

    /// Stores `doc`, dropping the document previously cached under `old_id`
    /// when the id changed.
    pub async fn replace(
        &self,
        storage: &StorageGuard<'_>,
        old_id: &str,
        doc: Document,
    ) -> SyncResult<Document> {
        if document_id(&doc).is_some_and(|id| id != old_id) {
            storage.remove_by_id(&self.collection, old_id).await?;
        }
        self.save(storage, vec![doc])
            .await?
            .pop()
            .ok_or_else(|| SyncError::InvalidEntity("storage returned no document".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::serial::SerialStorage;
    use lodestore_storage::InMemoryAdapter;
    use async_trait::async_trait;
    use lodestore_storage::{StorageAdapter, StorageResult};
    use lodestore_sync_protocol::is_local;
    use serde_json::{json, Value};
    use std::sync::Arc;

    /// Adapter whose saves report nothing written.
    #[derive(Default)]
    struct DroppingAdapter {
        inner: InMemoryAdapter,
    }

    #[async_trait]
    impl StorageAdapter for DroppingAdapter {
        async fn count(&self, namespace: &str, collection: &str) -> StorageResult<usize> {
            self.inner.count(namespace, collection).await
        }

        async fn find(&self, namespace: &str, collection: &str) -> StorageResult<Vec<Document>> {
            self.inner.find(namespace, collection).await
        }

        async fn find_by_id(
            &self,
            namespace: &str,
            collection: &str,
            id: &str,
        ) -> StorageResult<Option<Document>> {
            self.inner.find_by_id(namespace, collection, id).await
        }

        async fn save(
            &self,
            _namespace: &str,
            _collection: &str,
            _docs: Vec<Document>,
        ) -> StorageResult<Vec<Document>> {
            Ok(Vec::new())
        }

        async fn remove_by_id(
            &self,
            namespace: &str,
            collection: &str,
            id: &str,
        ) -> StorageResult<usize> {
            self.inner.remove_by_id(namespace, collection, id).await
        }

        async fn clear(&self, namespace: &str, collection: &str) -> StorageResult<usize> {
            self.inner.clear(namespace, collection).await
        }

        async fn clear_all(&self, namespace: &str, exclude: &[String]) -> StorageResult<()> {
            self.inner.clear_all(namespace, exclude).await
        }
    }

    fn doc(value: Value) -> Document {
        value.as_object().cloned().unwrap()
    }

    fn storage() -> SerialStorage {
        SerialStorage::new(Arc::new(InMemoryAdapter::new()), "ns".into())
    }

    #[tokio::test]
    async fn save_assigns_local_ids() {
        let storage = storage();
        let cache = LocalCache::new("books".into());
        let guard = storage.lock().await;

        let saved = cache
            .save(&guard, vec![doc(json!({"name": "a"})), doc(json!({"_id": "s1"}))])
            .await
            .unwrap();

        assert!(is_local(&saved[0]));
        assert!(document_id(&saved[0]).is_some());
        assert!(!is_local(&saved[1]));
        assert_eq!(cache.count(&guard, &Query::new()).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn remove_returns_matching_docs() {
        let storage = storage();
        let cache = LocalCache::new("books".into());
        let guard = storage.lock().await;
        cache
            .save(
                &guard,
                vec![
                    doc(json!({"_id": "1", "genre": "scifi"})),
                    doc(json!({"_id": "2", "genre": "drama"})),
                ],
            )
            .await
            .unwrap();

        let removed = cache
            .remove(&guard, &Query::new().equal_to("genre", "scifi"))
            .await
            .unwrap();

        assert_eq!(removed.len(), 1);
        assert_eq!(removed[0]["_id"], "1");
        assert_eq!(cache.count(&guard, &Query::new()).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn clear_with_and_without_query() {
        let storage = storage();
        let cache = LocalCache::new("books".into());
        let guard = storage.lock().await;
        cache
            .save(
                &guard,
                vec![doc(json!({"_id": "1", "n": 1})), doc(json!({"_id": "2", "n": 2})), doc(json!({"_id": "3", "n": 3}))],
            )
            .await
            .unwrap();

        assert_eq!(cache.clear(&guard, &Query::new().equal_to("n", 1)).await.unwrap(), 1);
        assert_eq!(cache.clear(&guard, &Query::new()).await.unwrap(), 2);
        assert_eq!(cache.clear(&guard, &Query::new()).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn replace_rewrites_id() {
        let storage = storage();
        let cache = LocalCache::new("books".into());
        let guard = storage.lock().await;
        let saved = cache
            .save(&guard, vec![doc(json!({"name": "a"}))])
            .await
            .unwrap();
        let local_id = document_id(&saved[0]).unwrap().to_string();

        cache
            .replace(&guard, &local_id, doc(json!({"_id": "server1", "name": "a"})))
            .await
            .unwrap();

        assert!(cache.find_by_id(&guard, &local_id).await.unwrap().is_none());
        let stored = cache.find_by_id(&guard, "server1").await.unwrap().unwrap();
        assert!(!is_local(&stored));
    }

    #[tokio::test]
    async fn replace_fails_when_storage_saves_nothing() {
        let storage = SerialStorage::new(Arc::new(DroppingAdapter::default()), "ns".into());
        let cache = LocalCache::new("books".into());
        let guard = storage.lock().await;

        let result = cache
            .replace(&guard, "local1", doc(json!({"_id": "server1", "name": "a"})))
            .await;

        assert!(matches!(result, Err(SyncError::InvalidEntity(_))));
    }
}
