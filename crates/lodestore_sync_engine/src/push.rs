//! Push pipeline: replay the sync log against the backend.

use crate::config::Settings;
use crate::error::{SyncError, SyncResult};
use crate::store::StoreInner;
use futures::stream::{self, StreamExt};
use lodestore_storage::{document_id, Document, ID_ATTRIBUTE};
use lodestore_sync_protocol::{clear_local, is_local, Query, SyncLogEntry, SyncOperation};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Outcome of pushing one sync log entry.
#[derive(Debug)]
pub struct PushResult {
    /// Id of the entity as recorded in the sync log.
    pub id: String,
    /// Operation that was replayed.
    pub operation: SyncOperation,
    /// Entity returned by the backend, or the local entity on failure.
    pub entity: Option<Document>,
    /// Why the push of this entity failed. The entry stays pending.
    pub error: Option<SyncError>,
}

impl PushResult {
    /// Returns true if the entity was pushed.
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

/// Push keys currently in flight.
///
/// One registry is shared by every store of a datastore.
#[derive(Debug, Default)]
pub(crate) struct PushRegistry {
    active: Mutex<HashSet<String>>,
}

impl PushRegistry {
    /// Claims `key` until the returned guard drops.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::SyncInProgress`] if a push for `key` is running.
    pub fn acquire(self: &Arc<Self>, key: &str) -> SyncResult<PushGuard> {
        if !self.active.lock().insert(key.to_string()) {
            return Err(SyncError::SyncInProgress(key.to_string()));
        }
        Ok(PushGuard {
            registry: Arc::clone(self),
            key: key.to_string(),
        })
    }

    #[cfg(test)]
    pub fn is_active(&self, key: &str) -> bool {
        self.active.lock().contains(key)
    }
}

/// Releases a push key on drop.
#[derive(Debug)]
pub(crate) struct PushGuard {
    registry: Arc<PushRegistry>,
    key: String,
}

impl Drop for PushGuard {
    fn drop(&mut self) {
        self.registry.active.lock().remove(&self.key);
    }
}

/// Pushes every entry matching `query`.
///
/// The caller holds the [`PushGuard`] for this store. Per-entity failures
/// are reported in the results; only reading the log can fail the call.
pub(crate) async fn push(
    inner: &StoreInner,
    query: &Query,
    settings: Settings,
) -> SyncResult<Vec<PushResult>> {
    let entries = {
        let storage = inner.storage.lock().await;
        inner.sync_log.entries(&storage, query).await?
    };
    if entries.is_empty() {
        return Ok(Vec::new());
    }

    let total = entries.len();
    let results: Vec<PushResult> = stream::iter(entries)
        .map(|entry| push_entry(inner, entry, settings))
        .buffer_unordered(settings.push_concurrency)
        .collect()
        .await;

    let failed = results.iter().filter(|r| !r.is_success()).count();
    info!(
        collection = %inner.physical,
        pushed = total - failed,
        failed,
        "push finished"
    );
    Ok(results)
}

async fn push_entry(inner: &StoreInner, entry: SyncLogEntry, settings: Settings) -> PushResult {
    let outcome = match entry.operation {
        SyncOperation::Delete => push_delete(inner, &entry, settings).await.map(|()| None),
        SyncOperation::Create | SyncOperation::Update => {
            push_upsert(inner, &entry, settings).await.map(Some)
        }
    };

    match outcome {
        Ok(entity) => {
            debug!(entity = %entry.entity_id, operation = %entry.operation, "pushed entity");
            PushResult {
                id: entry.entity_id,
                operation: entry.operation,
                entity,
                error: None,
            }
        }
        Err(error) => {
            warn!(
                entity = %entry.entity_id,
                operation = %entry.operation,
                %error,
                "push failed; entry kept"
            );
            PushResult {
                id: entry.entity_id,
                operation: entry.operation,
                entity: entry.entity,
                error: Some(error),
            }
        }
    }
}

async fn push_delete(inner: &StoreInner, entry: &SyncLogEntry, settings: Settings) -> SyncResult<()> {
    match inner.network.delete(&entry.entity_id, settings.timeout).await {
        Ok(()) => {}
        // Already gone on the backend.
        Err(SyncError::NotFound(_)) => {}
        Err(e) => return Err(e),
    }

    let storage = inner.storage.lock().await;
    if inner.sync_log.find_entry(&storage, &entry.entity_id).await?.as_ref() == Some(entry) {
        inner.sync_log.remove_entry(&storage, &entry.entity_id).await?;
    }
    Ok(())
}

async fn push_upsert(
    inner: &StoreInner,
    entry: &SyncLogEntry,
    settings: Settings,
) -> SyncResult<Document> {
    let mut entity = entry.entity.clone().ok_or_else(|| {
        SyncError::InvalidEntity(format!("sync entry {} has no entity", entry.entity_id))
    })?;

    let server = if entry.operation == SyncOperation::Create {
        if is_local(&entity) {
            entity.remove(ID_ATTRIBUTE);
        }
        clear_local(&mut entity);
        inner.network.create(entity, settings.timeout).await?
    } else {
        clear_local(&mut entity);
        inner
            .network
            .update(&entry.entity_id, entity, settings.timeout)
            .await?
    };
    let server_id = document_id(&server)
        .ok_or_else(|| SyncError::Protocol("backend returned an entity without _id".into()))?
        .to_string();

    let storage = inner.storage.lock().await;
    let current = inner.sync_log.find_entry(&storage, &entry.entity_id).await?;
    inner
        .sync_log
        .remove_entry(&storage, &entry.entity_id)
        .await?;

    let mut canonical = server.clone();
    clear_local(&mut canonical);

    match current {
        Some(newer) if &newer == entry => {
            inner
                .cache
                .replace(&storage, &entry.entity_id, canonical)
                .await?;
        }
        // Edited while the request was in flight: keep the newer local
        // state pending under the backend id.
        Some(newer) => {
            let mut local = newer.entity.unwrap_or(canonical);
            local.insert(ID_ATTRIBUTE.to_string(), server_id.into());
            clear_local(&mut local);
            let operation = if newer.operation == SyncOperation::Delete {
                SyncOperation::Delete
            } else {
                inner
                    .cache
                    .replace(&storage, &entry.entity_id, local.clone())
                    .await?;
                SyncOperation::Update
            };
            let rekeyed = SyncLogEntry::new(&entry.collection, operation, local)?;
            inner.sync_log.save_entry(&storage, &rekeyed).await?;
        }
        None => {
            if inner
                .cache
                .find_by_id(&storage, &entry.entity_id)
                .await?
                .is_some()
            {
                inner
                    .cache
                    .replace(&storage, &entry.entity_id, canonical)
                    .await?;
            } else {
                // A local-only create removed while in flight now exists
                // on the backend and must be deleted there too.
                let delete = SyncLogEntry::new(&entry.collection, SyncOperation::Delete, canonical)?;
                inner.sync_log.save_entry(&storage, &delete).await?;
            }
        }
    }

    Ok(server)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_is_exclusive_per_key() {
        let registry = Arc::new(PushRegistry::default());

        let guard = registry.acquire("books").unwrap();
        assert!(registry.is_active("books"));
        assert!(matches!(
            registry.acquire("books"),
            Err(SyncError::SyncInProgress(_))
        ));

        let other = registry.acquire("books.work").unwrap();
        drop(guard);
        assert!(!registry.is_active("books"));
        assert!(registry.acquire("books").is_ok());
        drop(other);
    }

    #[test]
    fn push_result_success() {
        let ok = PushResult {
            id: "a".into(),
            operation: SyncOperation::Create,
            entity: None,
            error: None,
        };
        assert!(ok.is_success());

        let failed = PushResult {
            error: Some(SyncError::Timeout),
            ..ok
        };
        assert!(!failed.is_success());
    }
}
