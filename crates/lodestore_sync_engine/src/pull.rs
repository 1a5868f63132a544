//! Pull pipeline: refresh the local cache from the backend.
//!
//! A pull picks one of three strategies:
//!
//! 1. **Delta set** when enabled and the query was pulled before. Only the
//!    documents changed or deleted since the recorded timestamp are fetched.
//! 2. **Auto-pagination** when enabled. The result set is counted and then
//!    fetched page by page.
//! 3. **Full** otherwise. One request fetches every matching document.
//!
//! Pulls never run while any sync log entry of the store is pending: a
//! pending edit may no longer match the pulled query, and the backend copy
//! would overwrite it.

use crate::config::Settings;
use crate::error::{SyncError, SyncResult};
use crate::push;
use crate::store::StoreInner;
use futures::stream::{self, StreamExt, TryStreamExt};
use lodestore_storage::{document_id, Document};
use lodestore_sync_protocol::Query;
use std::collections::HashSet;
use tracing::{debug, info, warn};

/// Pulls `query` into the cache and returns the number of documents received.
///
/// # Errors
///
/// Returns [`SyncError::PendingSyncConflict`] while entries are pending, or
/// the first network or storage error.
pub(crate) async fn pull(
    inner: &StoreInner,
    query: &Query,
    settings: Settings,
) -> SyncResult<usize> {
    ensure_nothing_pending(inner, settings).await?;

    let key = query.cache_key();
    if settings.use_delta_set {
        if let Some(key) = &key {
            let since = {
                let storage = inner.storage.lock().await;
                inner
                    .query_cache
                    .find(&storage, &inner.collection, key)
                    .await?
            };
            if let Some(entry) = since {
                match delta_pull(inner, query, key, &entry.last_request, settings).await {
                    Err(SyncError::DeltaSetUnavailable(reason)) => {
                        warn!(
                            collection = %inner.physical,
                            %reason,
                            "delta set unavailable; falling back to a full pull"
                        );
                    }
                    result => return result,
                }
            }
        }
    }

    match key {
        Some(key) if settings.use_auto_pagination => {
            paginated_pull(inner, query, &key, settings).await
        }
        key => full_pull(inner, query, key.as_deref(), settings).await,
    }
}

/// Pulls one entity by id.
///
/// A 404 removes the entity from the cache before the error is returned.
pub(crate) async fn pull_by_id(
    inner: &StoreInner,
    id: &str,
    settings: Settings,
) -> SyncResult<Document> {
    match pending_count(inner).await? {
        0 => {}
        count => return Err(SyncError::PendingSyncConflict { count }),
    }

    match inner.network.find_by_id(id, settings.timeout).await {
        Ok(doc) => {
            let storage = inner.storage.lock().await;
            let mut saved = inner.cache.save(&storage, vec![doc]).await?;
            saved
                .pop()
                .ok_or_else(|| SyncError::Protocol("backend returned no entity".into()))
        }
        Err(SyncError::NotFound(message)) => {
            let storage = inner.storage.lock().await;
            inner.cache.remove_by_id(&storage, id).await?;
            debug!(entity = %id, "entity gone on backend; removed from cache");
            Err(SyncError::NotFound(message))
        }
        Err(e) => Err(e),
    }
}

async fn ensure_nothing_pending(inner: &StoreInner, settings: Settings) -> SyncResult<()> {
    let pending = pending_count(inner).await?;
    if pending == 0 {
        return Ok(());
    }
    if !settings.push_first {
        return Err(SyncError::PendingSyncConflict { count: pending });
    }

    {
        let _guard = inner.push_registry.acquire(&inner.physical)?;
        push::push(inner, &Query::new(), settings).await?;
    }
    match pending_count(inner).await? {
        0 => Ok(()),
        count => Err(SyncError::PendingSyncConflict { count }),
    }
}

async fn pending_count(inner: &StoreInner) -> SyncResult<usize> {
    let storage = inner.storage.lock().await;
    inner.sync_log.count(&storage, &Query::new()).await
}

async fn record_request(
    inner: &StoreInner,
    key: &str,
    last_request: Option<String>,
) -> SyncResult<()> {
    match last_request {
        Some(ts) => {
            let storage = inner.storage.lock().await;
            inner
                .query_cache
                .save(&storage, &inner.collection, key, &ts)
                .await?;
        }
        None => debug!(
            collection = %inner.physical,
            "backend sent no request timestamp; query cache unchanged"
        ),
    }
    Ok(())
}

async fn delta_pull(
    inner: &StoreInner,
    query: &Query,
    key: &str,
    since: &str,
    settings: Settings,
) -> SyncResult<usize> {
    let (delta, last_request) = inner.network.delta_set(query, since, settings.timeout).await?;
    let received = delta.changed.len();

    {
        let storage = inner.storage.lock().await;
        for deleted in &delta.deleted {
            inner.cache.remove_by_id(&storage, &deleted.id).await?;
        }
        inner.cache.save(&storage, delta.changed).await?;
    }
    record_request(inner, key, last_request).await?;

    info!(
        collection = %inner.physical,
        changed = received,
        deleted = delta.deleted.len(),
        "delta pull finished"
    );
    Ok(received)
}

async fn paginated_pull(
    inner: &StoreInner,
    query: &Query,
    key: &str,
    settings: Settings,
) -> SyncResult<usize> {
    let (count, last_request) = inner.network.count(query, settings.timeout).await?;
    let total = usize::try_from(count)
        .map_err(|_| SyncError::Protocol(format!("count {count} out of range")))?;
    let page_size = settings.page_size;
    let pages = total.div_ceil(page_size);

    let fetched: Vec<Vec<Document>> = stream::iter(0..pages)
        .map(|page| {
            let skip = page * page_size;
            let window = query.page(skip, page_size.min(total - skip));
            async move {
                let (docs, _) = inner.network.find(&window, settings.timeout).await?;
                Ok::<_, SyncError>(docs)
            }
        })
        .buffered(settings.page_concurrency)
        .try_collect()
        .await?;

    let received: usize = fetched.iter().map(Vec::len).sum();
    {
        let storage = inner.storage.lock().await;
        inner.cache.clear(&storage, &query.filter_only()).await?;
        for docs in fetched {
            inner.cache.save(&storage, docs).await?;
        }
    }
    record_request(inner, key, last_request).await?;

    info!(
        collection = %inner.physical,
        pages,
        received,
        "paginated pull finished"
    );
    Ok(received)
}

async fn full_pull(
    inner: &StoreInner,
    query: &Query,
    key: Option<&str>,
    settings: Settings,
) -> SyncResult<usize> {
    let (docs, last_request) = inner.network.find(query, settings.timeout).await?;
    let received = docs.len();

    {
        let storage = inner.storage.lock().await;
        if key.is_some() {
            if query.filter().is_empty() {
                inner.cache.clear(&storage, &Query::new()).await?;
            } else {
                let fetched: HashSet<&str> = docs.iter().filter_map(document_id).collect();
                for stale in inner.cache.find(&storage, &query.filter_only()).await? {
                    if let Some(id) = document_id(&stale).filter(|id| !fetched.contains(id)) {
                        inner.cache.remove_by_id(&storage, id).await?;
                    }
                }
            }
        }
        inner.cache.save(&storage, docs).await?;
    }
    if let Some(key) = key {
        record_request(inner, key, last_request).await?;
    }

    info!(collection = %inner.physical, received, "pull finished");
    Ok(received)
}
