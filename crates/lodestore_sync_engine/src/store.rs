//! Store façade for one `(collection, tag)` pair.
//!
//! Writes land in the local cache and the sync log first. With auto-sync
//! enabled, writes then push the touched entities and reads reconcile the
//! cache with the backend before returning.
//!
//! `push`, `pull` and `sync` run as spawned tasks: dropping the returned
//! future does not stop log pruning or cache writes already under way.

use crate::cache::LocalCache;
use crate::config::{Settings, StoreConfig, StoreOptions};
use crate::error::{SyncError, SyncResult};
use crate::network::Network;
use crate::pull;
use crate::push::{self, PushRegistry, PushResult};
use crate::query_cache::QueryCache;
use crate::serial::SerialStorage;
use crate::sync_log::SyncLog;
use crate::transport::Transport;
use lodestore_storage::{document_id, Document};
use lodestore_sync_protocol::{Query, QueryCacheEntry, SyncLogEntry, SyncOperation};
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;
use tracing::debug;

/// Result of [`Store::sync`].
///
/// The pull result is kept apart from the push report so a blocked or failed
/// pull never hides which entities failed to push.
#[derive(Debug)]
pub struct SyncOutcome {
    /// One result per pushed sync log entry.
    pub push: Vec<PushResult>,
    /// Number of documents received by the pull, or why the pull failed.
    pub pull: SyncResult<usize>,
}

impl SyncOutcome {
    /// Returns the push results that failed.
    pub fn failed(&self) -> impl Iterator<Item = &PushResult> {
        self.push.iter().filter(|result| !result.is_success())
    }
}

/// Shared state of a store. Every component is driven only from here.
pub(crate) struct StoreInner {
    pub collection: String,
    pub physical: String,
    pub config: StoreConfig,
    pub storage: SerialStorage,
    pub cache: LocalCache,
    pub sync_log: SyncLog,
    pub query_cache: QueryCache,
    pub network: Network,
    pub push_registry: Arc<PushRegistry>,
}

/// A cache-first handle on one collection.
///
/// Cloning is cheap; clones share the same state.
#[derive(Clone)]
pub struct Store {
    inner: Arc<StoreInner>,
}

impl Store {
    pub(crate) fn new(
        collection: &str,
        config: StoreConfig,
        storage: SerialStorage,
        transport: Arc<dyn Transport>,
        push_registry: Arc<PushRegistry>,
    ) -> Self {
        let physical = match &config.tag {
            Some(tag) => format!("{collection}.{tag}"),
            None => collection.to_string(),
        };
        let network = Network::new(transport, storage.namespace(), collection);
        let inner = StoreInner {
            collection: collection.to_string(),
            cache: LocalCache::new(physical.clone()),
            sync_log: SyncLog::new(collection, &physical),
            query_cache: QueryCache::new(config.tag.as_deref()),
            physical,
            config,
            storage,
            network,
            push_registry,
        };
        Self {
            inner: Arc::new(inner),
        }
    }

    /// Returns the collection name.
    pub fn collection(&self) -> &str {
        &self.inner.collection
    }

    /// Returns the tag, if any.
    pub fn tag(&self) -> Option<&str> {
        self.inner.config.tag.as_deref()
    }

    /// Returns the store configuration.
    pub fn config(&self) -> &StoreConfig {
        &self.inner.config
    }

    fn settings(&self, options: &StoreOptions) -> Settings {
        self.inner.config.resolve(options)
    }

    // =========================================================================
    // Reads
    // =========================================================================

    /// Finds documents matching `query`.
    ///
    /// With auto-sync, the cached result is passed to
    /// [`StoreOptions::on_cached`], the query is pulled, and the refreshed
    /// cache is returned.
    ///
    /// # Errors
    ///
    /// Any pull error, including [`SyncError::PendingSyncConflict`].
    pub async fn find(&self, query: &Query, options: &StoreOptions) -> SyncResult<Vec<Document>> {
        if self.inner.config.auto_sync {
            options.emit_cached(&self.cached(query).await?);
            self.pull(query, options).await?;
        }
        self.cached(query).await
    }

    /// Finds one document by id.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::NotFound`] if the document is not cached, or
    /// with auto-sync, if the backend doesn't have it. In the latter case
    /// the cached copy is removed.
    pub async fn find_by_id(&self, id: &str, options: &StoreOptions) -> SyncResult<Document> {
        let cached = {
            let storage = self.inner.storage.lock().await;
            self.inner.cache.find_by_id(&storage, id).await?
        };
        if self.inner.config.auto_sync {
            if let Some(doc) = &cached {
                options.emit_cached(std::slice::from_ref(doc));
            }
            return self.pull_by_id(id, options).await;
        }
        cached.ok_or_else(|| SyncError::NotFound(format!("{} {id}", self.inner.collection)))
    }

    /// Counts documents matching the filter of `query`.
    ///
    /// With auto-sync the backend count is returned.
    pub async fn count(&self, query: &Query, options: &StoreOptions) -> SyncResult<usize> {
        if self.inner.config.auto_sync {
            let settings = self.settings(options);
            let (count, _) = self.inner.network.count(query, settings.timeout).await?;
            return usize::try_from(count)
                .map_err(|_| SyncError::Protocol(format!("count {count} out of range")));
        }
        let storage = self.inner.storage.lock().await;
        self.inner.cache.count(&storage, &query.filter_only()).await
    }

    async fn cached(&self, query: &Query) -> SyncResult<Vec<Document>> {
        let storage = self.inner.storage.lock().await;
        self.inner.cache.find(&storage, query).await
    }

    // =========================================================================
    // Writes
    // =========================================================================

    /// Creates a document.
    ///
    /// A document without `_id` gets a local id and is marked local. With
    /// auto-sync the backend entity is returned.
    ///
    /// # Errors
    ///
    /// With auto-sync, the push error of this entity. The entity stays
    /// pending in that case.
    pub async fn create(&self, doc: Document, options: &StoreOptions) -> SyncResult<Document> {
        let saved = {
            let storage = self.inner.storage.lock().await;
            let saved = self.save_one(&storage, doc).await?;
            self.inner.sync_log.add_create(&storage, vec![saved.clone()]).await?;
            saved
        };
        self.push_written(saved, options).await
    }

    /// Updates a document.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::InvalidEntity`] if `doc` has no `_id`, or with
    /// auto-sync, the push error of this entity.
    pub async fn update(&self, doc: Document, options: &StoreOptions) -> SyncResult<Document> {
        if document_id(&doc).is_none() {
            return Err(SyncError::InvalidEntity(format!(
                "update of {} requires an _id",
                self.inner.collection
            )));
        }
        let saved = {
            let storage = self.inner.storage.lock().await;
            let saved = self.save_one(&storage, doc).await?;
            self.inner.sync_log.add_update(&storage, vec![saved.clone()]).await?;
            saved
        };
        self.push_written(saved, options).await
    }

    /// Updates `doc` if it has an `_id`, otherwise creates it.
    pub async fn save(&self, doc: Document, options: &StoreOptions) -> SyncResult<Document> {
        if document_id(&doc).is_some() {
            self.update(doc, options).await
        } else {
            self.create(doc, options).await
        }
    }

    async fn save_one(
        &self,
        storage: &crate::serial::StorageGuard<'_>,
        doc: Document,
    ) -> SyncResult<Document> {
        self.inner
            .cache
            .save(storage, vec![doc])
            .await?
            .pop()
            .ok_or_else(|| SyncError::InvalidEntity("storage returned no document".into()))
    }

    async fn push_written(&self, saved: Document, options: &StoreOptions) -> SyncResult<Document> {
        if !self.inner.config.auto_sync {
            return Ok(saved);
        }
        let Some(id) = document_id(&saved).map(str::to_string) else {
            return Ok(saved);
        };
        let results = match self.push(&Query::new().equal_to("_id", id.as_str()), options).await {
            Ok(results) => results,
            Err(SyncError::SyncInProgress(_)) => {
                debug!(entity = %id, "push in progress; entity stays pending");
                return Ok(saved);
            }
            Err(e) => return Err(e),
        };
        match results.into_iter().find(|result| result.id == id) {
            Some(PushResult {
                error: Some(error), ..
            }) => Err(error),
            Some(PushResult {
                entity: Some(entity),
                ..
            }) => Ok(entity),
            _ => Ok(saved),
        }
    }

    /// Removes the documents matching `query` and returns how many were
    /// removed.
    ///
    /// With auto-sync the deletes are pushed; a failed delete is not
    /// counted and stays pending.
    pub async fn remove(&self, query: &Query, options: &StoreOptions) -> SyncResult<usize> {
        let removed = {
            let storage = self.inner.storage.lock().await;
            let removed = self.inner.cache.remove(&storage, query).await?;
            self.inner.sync_log.add_delete(&storage, removed.clone()).await?;
            removed
        };
        let mut count = removed.len();
        if !self.inner.config.auto_sync || removed.is_empty() {
            return Ok(count);
        }

        let ids: Vec<Value> = removed
            .iter()
            .filter_map(document_id)
            .map(|id| Value::String(id.to_string()))
            .collect();
        match self.push(&Query::new().contains("_id", ids), options).await {
            Ok(results) => {
                count -= results
                    .iter()
                    .filter(|r| r.operation == SyncOperation::Delete && !r.is_success())
                    .count();
            }
            Err(SyncError::SyncInProgress(_)) => {
                debug!(collection = %self.inner.physical, "push in progress; deletes stay pending");
            }
            Err(e) => return Err(e),
        }
        Ok(count)
    }

    /// Removes one document by id.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::NotFound`] if the document is not cached.
    pub async fn remove_by_id(&self, id: &str, options: &StoreOptions) -> SyncResult<usize> {
        let exists = {
            let storage = self.inner.storage.lock().await;
            self.inner.cache.find_by_id(&storage, id).await?.is_some()
        };
        if !exists {
            return Err(SyncError::NotFound(format!("{} {id}", self.inner.collection)));
        }
        self.remove(&Query::new().equal_to("_id", id), options).await
    }

    /// Drops cached documents matching `query` together with their pending
    /// sync entries. Nothing is sent to the backend.
    ///
    /// An empty query also forgets this collection's query cache entries.
    pub async fn clear(&self, query: &Query) -> SyncResult<usize> {
        let storage = self.inner.storage.lock().await;
        let removed = self.inner.cache.clear(&storage, query).await?;
        self.inner.sync_log.remove(&storage, query).await?;
        if query.is_empty() {
            self.inner
                .query_cache
                .remove_for_collection(&storage, &self.inner.collection)
                .await?;
        }
        debug!(collection = %self.inner.physical, removed, "cleared local cache");
        Ok(removed)
    }

    // =========================================================================
    // Sync
    // =========================================================================

    /// Counts pending sync log entries matching `query`.
    pub async fn pending_sync_count(&self, query: &Query) -> SyncResult<usize> {
        let storage = self.inner.storage.lock().await;
        self.inner.sync_log.count(&storage, query).await
    }

    /// Returns the pending sync log entries matching `query`.
    pub async fn pending_sync_entities(&self, query: &Query) -> SyncResult<Vec<SyncLogEntry>> {
        let storage = self.inner.storage.lock().await;
        self.inner.sync_log.entries(&storage, query).await
    }

    /// Discards pending sync log entries without pushing them.
    ///
    /// **Dangerous:** unsynced local edits matching `query` are lost for
    /// good. The cached documents are left as they are.
    pub async fn clear_sync(&self, query: &Query) -> SyncResult<usize> {
        let storage = self.inner.storage.lock().await;
        let removed = self.inner.sync_log.remove(&storage, query).await?;
        debug!(collection = %self.inner.physical, removed, "discarded pending sync entries");
        Ok(removed)
    }

    /// Returns the query cache entries of this collection.
    pub async fn query_cache_entries(&self) -> SyncResult<Vec<QueryCacheEntry>> {
        let storage = self.inner.storage.lock().await;
        Ok(self
            .inner
            .query_cache
            .entries(&storage)
            .await?
            .into_iter()
            .filter(|entry| entry.collection_name == self.inner.collection)
            .collect())
    }

    /// Pushes pending entries matching `query`.
    ///
    /// Per-entity failures are reported in the results and keep their
    /// entries pending.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::SyncInProgress`] while another push of this
    /// collection and tag runs, or a storage error if the log can't be read.
    pub async fn push(&self, query: &Query, options: &StoreOptions) -> SyncResult<Vec<PushResult>> {
        let guard = self.inner.push_registry.acquire(&self.inner.physical)?;
        let inner = Arc::clone(&self.inner);
        let query = query.clone();
        let settings = self.settings(options);
        run_detached(async move {
            let results = push::push(&inner, &query, settings).await;
            drop(guard);
            results
        })
        .await
    }

    /// Pulls documents matching `query` into the cache.
    ///
    /// Returns the number of documents received.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::PendingSyncConflict`] while any entry of this
    /// store is pending and [`StoreOptions::push_first`] is off, or the push
    /// left entries behind. Network and storage errors abort the pull.
    pub async fn pull(&self, query: &Query, options: &StoreOptions) -> SyncResult<usize> {
        let inner = Arc::clone(&self.inner);
        let query = query.clone();
        let settings = self.settings(options);
        run_detached(async move { pull::pull(&inner, &query, settings).await }).await
    }

    /// Pulls one document by id.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::PendingSyncConflict`] while any entry of this
    /// store is pending, and [`SyncError::NotFound`] after removing the
    /// cached copy when the backend doesn't have the document.
    pub async fn pull_by_id(&self, id: &str, options: &StoreOptions) -> SyncResult<Document> {
        let inner = Arc::clone(&self.inner);
        let id = id.to_string();
        let settings = self.settings(options);
        run_detached(async move { pull::pull_by_id(&inner, &id, settings).await }).await
    }

    /// Pushes every pending entry and then pulls `query`.
    ///
    /// The pull outcome is reported in [`SyncOutcome::pull`]. When a push
    /// failure leaves entries pending it holds
    /// [`SyncError::PendingSyncConflict`] and the push results still say
    /// which entities failed.
    ///
    /// # Errors
    ///
    /// As [`Store::push`].
    pub async fn sync(&self, query: &Query, options: &StoreOptions) -> SyncResult<SyncOutcome> {
        let guard = self.inner.push_registry.acquire(&self.inner.physical)?;
        let inner = Arc::clone(&self.inner);
        let query = query.clone();
        let settings = Settings {
            push_first: false,
            ..self.settings(options)
        };
        run_detached(async move {
            let push = push::push(&inner, &Query::new(), settings).await?;
            drop(guard);
            let pull = pull::pull(&inner, &query, settings).await;
            Ok(SyncOutcome { push, pull })
        })
        .await
    }
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store")
            .field("collection", &self.inner.collection)
            .field("tag", &self.inner.config.tag)
            .finish()
    }
}

/// Runs `task` on the runtime so it completes even if the caller goes away.
async fn run_detached<T, F>(task: F) -> SyncResult<T>
where
    T: Send + 'static,
    F: Future<Output = SyncResult<T>> + Send + 'static,
{
    match tokio::spawn(task).await {
        Ok(result) => result,
        Err(err) if err.is_panic() => std::panic::resume_unwind(err.into_panic()),
        Err(err) => Err(SyncError::TaskFailed(err.to_string())),
    }
}
