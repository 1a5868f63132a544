//! Query cache: last pull timestamp per query signature.

use crate::error::{SyncError, SyncResult};
use crate::serial::StorageGuard;
use lodestore_sync_protocol::{document_id, generate_id, QueryCacheEntry};

/// Reserved collection holding query cache entries.
pub(crate) const QUERY_CACHE_COLLECTION: &str = "_QueryCache";

/// Query cache shared by every collection with the same tag.
#[derive(Debug, Clone)]
pub(crate) struct QueryCache {
    collection: String,
}

impl QueryCache {
    pub fn new(tag: Option<&str>) -> Self {
        let collection = match tag {
            Some(tag) => format!("{QUERY_CACHE_COLLECTION}.{tag}"),
            None => QUERY_CACHE_COLLECTION.to_string(),
        };
        Self { collection }
    }

    pub async fn entries(&self, storage: &StorageGuard<'_>) -> SyncResult<Vec<QueryCacheEntry>> {
        storage
            .find(&self.collection)
            .await?
            .into_iter()
            .map(|doc| QueryCacheEntry::from_document(doc).map_err(SyncError::from))
            .collect()
    }

    pub async fn find(
        &self,
        storage: &StorageGuard<'_>,
        collection_name: &str,
        key: &str,
    ) -> SyncResult<Option<QueryCacheEntry>> {
        Ok(self
            .entries(storage)
            .await?
            .into_iter()
            .find(|entry| entry.collection_name == collection_name && entry.query == key))
    }

    /// Records `last_request` for the query, reusing the existing entry.
    pub async fn save(
        &self,
        storage: &StorageGuard<'_>,
        collection_name: &str,
        key: &str,
        last_request: &str,
    ) -> SyncResult<QueryCacheEntry> {
        let id = match self.find(storage, collection_name, key).await? {
            Some(existing) => existing.id,
            None => generate_id(),
        };
        let entry = QueryCacheEntry {
            id,
            collection_name: collection_name.to_string(),
            query: key.to_string(),
            last_request: last_request.to_string(),
        };
        storage
            .save(&self.collection, vec![entry.to_document()?])
            .await?;
        Ok(entry)
    }

    /// Removes every entry recorded for a collection.
    pub async fn remove_for_collection(
        &self,
        storage: &StorageGuard<'_>,
        collection_name: &str,
    ) -> SyncResult<usize> {
        let mut removed = 0;
        for doc in storage.find(&self.collection).await? {
            let belongs = doc
                .get("collectionName")
                .and_then(|name| name.as_str())
                .is_some_and(|name| name == collection_name);
            if let (true, Some(id)) = (belongs, document_id(&doc)) {
                removed += storage.remove_by_id(&self.collection, id).await?;
            }
        }
        Ok(removed)
    }
}
