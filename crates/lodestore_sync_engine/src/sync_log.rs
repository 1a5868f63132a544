//! Sync log: at most one pending mutation per entity.

use crate::error::{SyncError, SyncResult};
use crate::serial::StorageGuard;
use lodestore_storage::{document_id, Document};
use lodestore_sync_protocol::{collapse, Collapse, Query, SyncLogEntry, SyncOperation};
use tracing::debug;

/// Prefix of the reserved sync log collections.
pub(crate) const SYNC_LOG_PREFIX: &str = "_Sync";

/// Pending mutations of one `(collection, tag)` pair.
#[derive(Debug, Clone)]
pub(crate) struct SyncLog {
    collection: String,
    log_collection: String,
}

impl SyncLog {
    /// `collection` is the logical name; `physical` includes the tag.
    pub fn new(collection: &str, physical: &str) -> Self {
        Self {
            collection: collection.to_string(),
            log_collection: format!("{SYNC_LOG_PREFIX}.{physical}"),
        }
    }

    pub async fn add_create(&self, storage: &StorageGuard<'_>, docs: Vec<Document>) -> SyncResult<usize> {
        self.add(storage, SyncOperation::Create, docs).await
    }

    pub async fn add_update(&self, storage: &StorageGuard<'_>, docs: Vec<Document>) -> SyncResult<usize> {
        self.add(storage, SyncOperation::Update, docs).await
    }

    pub async fn add_delete(&self, storage: &StorageGuard<'_>, docs: Vec<Document>) -> SyncResult<usize> {
        self.add(storage, SyncOperation::Delete, docs).await
    }

    /// Records one mutation per document, collapsing with pending entries.
    ///
    /// Returns the number of entries stored. Nothing is written when any
    /// document lacks `_id`.
    async fn add(
        &self,
        storage: &StorageGuard<'_>,
        operation: SyncOperation,
        docs: Vec<Document>,
    ) -> SyncResult<usize> {
        if docs.iter().any(|doc| document_id(doc).is_none()) {
            return Err(SyncError::InvalidEntity(format!(
                "{operation} entity for {} has no _id",
                self.collection
            )));
        }

        let mut stored = 0;
        for doc in docs {
            let Some(id) = document_id(&doc).map(str::to_string) else {
                continue;
            };
            let existing = self.find_entry(storage, &id).await?;
            match collapse(existing.as_ref(), &self.collection, operation, doc)? {
                Collapse::Upsert(entry) => {
                    debug!(entity = %id, operation = %entry.operation, "recorded sync entry");
                    storage
                        .save(&self.log_collection, vec![entry.to_document()?])
                        .await?;
                    stored += 1;
                }
                Collapse::Drop => {
                    debug!(entity = %id, "dropped sync entry for local-only entity");
                    storage.remove_by_id(&self.log_collection, &id).await?;
                }
            }
        }
        Ok(stored)
    }

    pub async fn find_entry(
        &self,
        storage: &StorageGuard<'_>,
        entity_id: &str,
    ) -> SyncResult<Option<SyncLogEntry>> {
        match storage.find_by_id(&self.log_collection, entity_id).await? {
            Some(doc) => Ok(Some(SyncLogEntry::from_document(doc)?)),
            None => Ok(None),
        }
    }

    /// Entries whose entity matches the query filter.
    pub async fn entries(
        &self,
        storage: &StorageGuard<'_>,
        query: &Query,
    ) -> SyncResult<Vec<SyncLogEntry>> {
        let mut entries = Vec::new();
        for doc in storage.find(&self.log_collection).await? {
            let entry = SyncLogEntry::from_document(doc)?;
            if query.matches(&entry.match_target()) {
                entries.push(entry);
            }
        }
        Ok(entries)
    }

    pub async fn count(&self, storage: &StorageGuard<'_>, query: &Query) -> SyncResult<usize> {
        if query.filter().is_empty() {
            return storage.count(&self.log_collection).await;
        }
        Ok(self.entries(storage, query).await?.len())
    }

    pub async fn remove(&self, storage: &StorageGuard<'_>, query: &Query) -> SyncResult<usize> {
        if query.filter().is_empty() {
            return storage.clear(&self.log_collection).await;
        }
        let mut removed = 0;
        for entry in self.entries(storage, query).await? {
            removed += storage.remove_by_id(&self.log_collection, &entry.id).await?;
        }
        Ok(removed)
    }

    pub async fn remove_entry(&self, storage: &StorageGuard<'_>, entity_id: &str) -> SyncResult<usize> {
        storage.remove_by_id(&self.log_collection, entity_id).await
    }

    pub async fn save_entry(&self, storage: &StorageGuard<'_>, entry: &SyncLogEntry) -> SyncResult<()> {
        storage
            .save(&self.log_collection, vec![entry.to_document()?])
            .await?;
        Ok(())
    }
}
