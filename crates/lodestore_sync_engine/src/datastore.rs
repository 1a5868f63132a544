//! Root handle tying storage, transport and stores together.

use crate::config::{validate_collection, DatastoreConfig, StoreConfig};
use crate::error::SyncResult;
use crate::push::PushRegistry;
use crate::query_cache::QueryCache;
use crate::serial::SerialStorage;
use crate::store::Store;
use crate::transport::Transport;
use lodestore_storage::StorageAdapter;
use lodestore_sync_protocol::QueryCacheEntry;
use std::sync::Arc;
use tracing::info;

/// Opens stores over one storage adapter and one backend.
///
/// Every store opened from the same datastore shares the storage gate and
/// the push registry, so at most one push runs per collection and tag.
///
/// # Example
///
/// ```rust,no_run
/// use lodestore_sync_engine::{Datastore, DatastoreConfig, HttpTransport, StoreConfig};
/// use lodestore_storage::InMemoryAdapter;
/// use std::sync::Arc;
///
/// # fn main() -> Result<(), lodestore_sync_engine::SyncError> {
/// let datastore = Datastore::new(
///     Arc::new(InMemoryAdapter::new()),
///     Arc::new(HttpTransport::new("https://backend.example.com")?),
///     DatastoreConfig::default(),
/// )?;
/// let books = datastore.collection("books", StoreConfig::new().with_tag("work"))?;
/// assert_eq!(books.tag(), Some("work"));
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct Datastore {
    storage: SerialStorage,
    transport: Arc<dyn Transport>,
    push_registry: Arc<PushRegistry>,
}

impl Datastore {
    /// Creates a datastore.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Config`](crate::SyncError::Config) for an invalid
    /// configuration.
    pub fn new(
        adapter: Arc<dyn StorageAdapter>,
        transport: Arc<dyn Transport>,
        config: DatastoreConfig,
    ) -> SyncResult<Self> {
        config.validate()?;
        Ok(Self {
            storage: SerialStorage::new(adapter, config.namespace),
            transport,
            push_registry: Arc::new(PushRegistry::default()),
        })
    }

    /// Returns the storage namespace.
    pub fn namespace(&self) -> &str {
        self.storage.namespace()
    }

    /// Opens the store of `name` with `config`.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Config`](crate::SyncError::Config) for a
    /// reserved or empty name, an invalid tag or invalid limits.
    pub fn collection(&self, name: &str, config: StoreConfig) -> SyncResult<Store> {
        validate_collection(name)?;
        config.validate()?;
        Ok(Store::new(
            name,
            config,
            self.storage.clone(),
            Arc::clone(&self.transport),
            Arc::clone(&self.push_registry),
        ))
    }

    /// Returns every query cache entry recorded under `tag`.
    pub async fn query_cache_entries(&self, tag: Option<&str>) -> SyncResult<Vec<QueryCacheEntry>> {
        let storage = self.storage.lock().await;
        QueryCache::new(tag).entries(&storage).await
    }

    /// Removes every collection of the namespace, including sync logs and
    /// query caches.
    ///
    /// **Dangerous:** pending local edits are lost.
    pub async fn clear_cache(&self) -> SyncResult<()> {
        let storage = self.storage.lock().await;
        storage.clear_all(&[]).await?;
        info!(namespace = %self.storage.namespace(), "cleared local cache");
        Ok(())
    }
}

impl std::fmt::Debug for Datastore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Datastore")
            .field("namespace", &self.storage.namespace())
            .finish()
    }
}
