//! Serialized access to the storage adapter.
//!
//! Every adapter call goes through a [`StorageGuard`]. One gate is shared by
//! all stores of a datastore, so at most one storage operation is in flight
//! and a read-modify-write holding the guard can't interleave with another.

use crate::error::SyncResult;
use lodestore_storage::{Document, StorageAdapter};
use std::sync::Arc;
use tokio::sync::{Mutex, MutexGuard};

/// Storage adapter plus namespace and serialization gate.
#[derive(Clone)]
pub(crate) struct SerialStorage {
    adapter: Arc<dyn StorageAdapter>,
    namespace: String,
    gate: Arc<Mutex<()>>,
}

impl SerialStorage {
    pub fn new(adapter: Arc<dyn StorageAdapter>, namespace: String) -> Self {
        Self {
            adapter,
            namespace,
            gate: Arc::new(Mutex::new(())),
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Waits for exclusive access.
    ///
    /// Never call this while holding another guard from the same storage.
    pub async fn lock(&self) -> StorageGuard<'_> {
        StorageGuard {
            _permit: self.gate.lock().await,
            storage: self,
        }
    }
}

/// Exclusive access to the adapter.
pub(crate) struct StorageGuard<'a> {
    _permit: MutexGuard<'a, ()>,
    storage: &'a SerialStorage,
}

impl StorageGuard<'_> {
    fn adapter(&self) -> &dyn StorageAdapter {
        self.storage.adapter.as_ref()
    }

    fn namespace(&self) -> &str {
        &self.storage.namespace
    }

    pub async fn count(&self, collection: &str) -> SyncResult<usize> {
        Ok(self.adapter().count(self.namespace(), collection).await?)
    }

    pub async fn find(&self, collection: &str) -> SyncResult<Vec<Document>> {
        Ok(self.adapter().find(self.namespace(), collection).await?)
    }

    pub async fn find_by_id(&self, collection: &str, id: &str) -> SyncResult<Option<Document>> {
        Ok(self
            .adapter()
            .find_by_id(self.namespace(), collection, id)
            .await?)
    }

    pub async fn save(&self, collection: &str, docs: Vec<Document>) -> SyncResult<Vec<Document>> {
        Ok(self.adapter().save(self.namespace(), collection, docs).await?)
    }

    pub async fn remove_by_id(&self, collection: &str, id: &str) -> SyncResult<usize> {
        Ok(self
            .adapter()
            .remove_by_id(self.namespace(), collection, id)
            .await?)
    }

    pub async fn clear(&self, collection: &str) -> SyncResult<usize> {
        Ok(self.adapter().clear(self.namespace(), collection).await?)
    }

    pub async fn clear_all(&self, exclude: &[String]) -> SyncResult<()> {
        Ok(self.adapter().clear_all(self.namespace(), exclude).await?)
    }
}
