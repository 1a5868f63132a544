//! CLI command implementations.

pub mod clear_sync;
pub mod pending;
pub mod query_cache;
pub mod sync;

use lodestore_storage::FileAdapter;
use lodestore_sync_engine::{
    Datastore, DatastoreConfig, HttpTransport, StaticSession, Store, StoreConfig,
};
use std::path::PathBuf;
use std::sync::Arc;

/// Backend URL used by commands that never reach the network.
const OFFLINE_URL: &str = "http://127.0.0.1";

/// Shared command settings.
pub struct Context {
    /// Cache directory.
    pub path: PathBuf,
    /// Storage namespace.
    pub namespace: String,
    /// Cache tag.
    pub tag: Option<String>,
    /// Backend base URL.
    pub url: Option<String>,
    /// Session token.
    pub token: Option<String>,
}

impl Context {
    /// Opens the file adapter at the cache path.
    pub fn adapter(&self) -> Result<FileAdapter, Box<dyn std::error::Error>> {
        if !self.path.is_dir() {
            return Err(format!("No cache found at {:?}", self.path).into());
        }
        Ok(FileAdapter::open(&self.path)?)
    }

    /// Opens the datastore. `online` requires `--url`.
    pub fn datastore(&self, online: bool) -> Result<Datastore, Box<dyn std::error::Error>> {
        let url = match (&self.url, online) {
            (Some(url), _) => url.clone(),
            (None, true) => return Err("Backend URL required (--url)".into()),
            (None, false) => OFFLINE_URL.to_string(),
        };
        let mut transport = HttpTransport::new(url)?;
        if let Some(token) = &self.token {
            transport = transport.with_session(Arc::new(StaticSession::with_token(token.clone())));
        }

        Ok(Datastore::new(
            Arc::new(self.adapter()?),
            Arc::new(transport),
            DatastoreConfig::new().with_namespace(self.namespace.clone()),
        )?)
    }

    /// Opens a store with auto-sync off.
    pub fn store(
        &self,
        collection: &str,
        online: bool,
    ) -> Result<Store, Box<dyn std::error::Error>> {
        let datastore = self.datastore(online)?;
        let mut config = StoreConfig::new().with_auto_sync(false);
        if let Some(tag) = &self.tag {
            config = config.with_tag(tag.clone());
        }
        Ok(datastore.collection(collection, config)?)
    }
}
