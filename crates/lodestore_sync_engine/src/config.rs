//! Configuration for stores and datastores.

use crate::error::{SyncError, SyncResult};
use lodestore_storage::Document;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Default number of documents fetched per page during auto-pagination.
pub const DEFAULT_PAGE_SIZE: usize = 10_000;

/// Default number of sync log entries pushed concurrently.
pub const DEFAULT_PUSH_CONCURRENCY: usize = 100;

/// Default number of pages fetched concurrently during auto-pagination.
pub const DEFAULT_PAGE_CONCURRENCY: usize = 4;

/// Default storage namespace.
pub const DEFAULT_NAMESPACE: &str = "appdata";

/// Callback receiving the cached documents before a network reconciliation.
pub type CachedCallback = Arc<dyn Fn(&[Document]) + Send + Sync>;

/// Configuration for one store.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Optional tag separating independent caches of the same collection.
    pub tag: Option<String>,
    /// Push writes immediately and pull on reads.
    pub auto_sync: bool,
    /// Use delta-set pulls for queries that were pulled before.
    pub use_delta_set: bool,
    /// Pull large result sets page by page.
    pub use_auto_pagination: bool,
    /// Page size for auto-pagination.
    pub page_size: usize,
    /// Maximum sync log entries pushed concurrently.
    pub push_concurrency: usize,
    /// Maximum pages fetched concurrently.
    pub page_concurrency: usize,
    /// Per-request timeout; `None` disables it.
    pub timeout: Option<Duration>,
}

impl StoreConfig {
    /// Creates a configuration with defaults.
    pub fn new() -> Self {
        Self {
            tag: None,
            auto_sync: true,
            use_delta_set: false,
            use_auto_pagination: false,
            page_size: DEFAULT_PAGE_SIZE,
            push_concurrency: DEFAULT_PUSH_CONCURRENCY,
            page_concurrency: DEFAULT_PAGE_CONCURRENCY,
            timeout: Some(Duration::from_secs(30)),
        }
    }

    /// Sets the tag.
    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tag = Some(tag.into());
        self
    }

    /// Enables or disables auto-sync.
    pub fn with_auto_sync(mut self, auto_sync: bool) -> Self {
        self.auto_sync = auto_sync;
        self
    }

    /// Enables or disables delta-set pulls.
    pub fn with_delta_set(mut self, enabled: bool) -> Self {
        self.use_delta_set = enabled;
        self
    }

    /// Enables or disables auto-pagination.
    pub fn with_auto_pagination(mut self, enabled: bool) -> Self {
        self.use_auto_pagination = enabled;
        self
    }

    /// Sets the page size.
    pub fn with_page_size(mut self, size: usize) -> Self {
        self.page_size = size;
        self
    }

    /// Sets the push concurrency.
    pub fn with_push_concurrency(mut self, limit: usize) -> Self {
        self.push_concurrency = limit;
        self
    }

    /// Sets the page concurrency.
    pub fn with_page_concurrency(mut self, limit: usize) -> Self {
        self.page_concurrency = limit;
        self
    }

    /// Sets the request timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Disables the request timeout.
    pub fn without_timeout(mut self) -> Self {
        self.timeout = None;
        self
    }

    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Config`] for an invalid tag or a zero size.
    pub fn validate(&self) -> SyncResult<()> {
        if let Some(tag) = &self.tag {
            validate_tag(tag)?;
        }
        if self.page_size == 0 {
            return Err(SyncError::Config("page size must be positive".into()));
        }
        if self.push_concurrency == 0 || self.page_concurrency == 0 {
            return Err(SyncError::Config("concurrency limits must be positive".into()));
        }
        Ok(())
    }

    /// Applies per-call overrides.
    pub(crate) fn resolve(&self, options: &StoreOptions) -> Settings {
        Settings {
            use_delta_set: options.use_delta_set.unwrap_or(self.use_delta_set),
            use_auto_pagination: options
                .use_auto_pagination
                .unwrap_or(self.use_auto_pagination),
            page_size: options.page_size.unwrap_or(self.page_size).max(1),
            push_concurrency: self.push_concurrency.max(1),
            page_concurrency: self.page_concurrency.max(1),
            timeout: options.timeout.or(self.timeout),
            push_first: options.push_first,
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Per-call options.
///
/// Unset fields fall back to the store's [`StoreConfig`].
#[derive(Clone, Default)]
pub struct StoreOptions {
    /// Overrides [`StoreConfig::use_delta_set`].
    pub use_delta_set: Option<bool>,
    /// Overrides [`StoreConfig::use_auto_pagination`].
    pub use_auto_pagination: Option<bool>,
    /// Overrides [`StoreConfig::page_size`].
    pub page_size: Option<usize>,
    /// Overrides [`StoreConfig::timeout`].
    pub timeout: Option<Duration>,
    /// Push pending entries before a pull instead of failing.
    pub push_first: bool,
    /// Receives cached documents before auto-sync reads hit the network.
    pub on_cached: Option<CachedCallback>,
}

impl StoreOptions {
    /// Creates empty options.
    pub fn new() -> Self {
        Self::default()
    }

    /// Overrides delta-set pulls.
    pub fn with_delta_set(mut self, enabled: bool) -> Self {
        self.use_delta_set = Some(enabled);
        self
    }

    /// Overrides auto-pagination.
    pub fn with_auto_pagination(mut self, enabled: bool) -> Self {
        self.use_auto_pagination = Some(enabled);
        self
    }

    /// Overrides the page size.
    pub fn with_page_size(mut self, size: usize) -> Self {
        self.page_size = Some(size);
        self
    }

    /// Overrides the request timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Pushes pending entries before pulling.
    pub fn with_push_first(mut self, push_first: bool) -> Self {
        self.push_first = push_first;
        self
    }

    /// Sets the cached-documents callback.
    pub fn with_on_cached(mut self, callback: impl Fn(&[Document]) + Send + Sync + 'static) -> Self {
        self.on_cached = Some(Arc::new(callback));
        self
    }

    pub(crate) fn emit_cached(&self, docs: &[Document]) {
        if let Some(callback) = &self.on_cached {
            callback(docs);
        }
    }
}

impl fmt::Debug for StoreOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoreOptions")
            .field("use_delta_set", &self.use_delta_set)
            .field("use_auto_pagination", &self.use_auto_pagination)
            .field("page_size", &self.page_size)
            .field("timeout", &self.timeout)
            .field("push_first", &self.push_first)
            .field("on_cached", &self.on_cached.is_some())
            .finish()
    }
}

/// Effective settings for one call.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Settings {
    pub use_delta_set: bool,
    pub use_auto_pagination: bool,
    pub page_size: usize,
    pub push_concurrency: usize,
    pub page_concurrency: usize,
    pub timeout: Option<Duration>,
    pub push_first: bool,
}

/// Configuration for a datastore.
#[derive(Debug, Clone)]
pub struct DatastoreConfig {
    /// Storage namespace shared by every store.
    pub namespace: String,
}

impl DatastoreConfig {
    /// Creates a configuration with the default namespace.
    pub fn new() -> Self {
        Self {
            namespace: DEFAULT_NAMESPACE.to_string(),
        }
    }

    /// Sets the namespace.
    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    /// Validates the configuration.
    pub fn validate(&self) -> SyncResult<()> {
        if self.namespace.is_empty() {
            return Err(SyncError::Config("namespace must not be empty".into()));
        }
        Ok(())
    }
}

impl Default for DatastoreConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Tags are non-empty and use only ASCII letters, digits and `-`.
pub(crate) fn validate_tag(tag: &str) -> SyncResult<()> {
    let valid = !tag.is_empty() && tag.chars().all(|c| c.is_ascii_alphanumeric() || c == '-');
    if !valid {
        return Err(SyncError::Config(format!(
            "tag {tag:?} may only contain letters, digits and '-'"
        )));
    }
    Ok(())
}

/// Collection names are non-empty and must not start with `_`.
pub(crate) fn validate_collection(name: &str) -> SyncResult<()> {
    if name.is_empty() || name.starts_with('_') {
        return Err(SyncError::Config(format!(
            "collection name {name:?} is empty or reserved"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_config_builder() {
        let config = StoreConfig::new()
            .with_tag("work-1")
            .with_auto_sync(false)
            .with_delta_set(true)
            .with_page_size(50)
            .with_timeout(Duration::from_secs(5));

        assert_eq!(config.tag.as_deref(), Some("work-1"));
        assert!(!config.auto_sync);
        assert!(config.use_delta_set);
        assert_eq!(config.page_size, 50);
        assert_eq!(config.timeout, Some(Duration::from_secs(5)));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn store_config_defaults() {
        let config = StoreConfig::default();
        assert!(config.auto_sync);
        assert_eq!(config.page_size, DEFAULT_PAGE_SIZE);
        assert_eq!(config.push_concurrency, DEFAULT_PUSH_CONCURRENCY);
        assert_eq!(config.timeout, Some(Duration::from_secs(30)));
        assert_eq!(config.without_timeout().timeout, None);
    }

    #[test]
    fn invalid_configs() {
        assert!(StoreConfig::new().with_tag("a b").validate().is_err());
        assert!(StoreConfig::new().with_tag("").validate().is_err());
        assert!(StoreConfig::new().with_tag("ünïcode").validate().is_err());
        assert!(StoreConfig::new().with_page_size(0).validate().is_err());
        assert!(StoreConfig::new().with_push_concurrency(0).validate().is_err());
        assert!(DatastoreConfig::new().with_namespace("").validate().is_err());
    }

    #[test]
    fn collection_names() {
        assert!(validate_collection("books").is_ok());
        assert!(validate_collection("").is_err());
        assert!(validate_collection("_Sync").is_err());
    }

    #[test]
    fn options_override_config() {
        let config = StoreConfig::new().with_page_size(100);
        let settings = config.resolve(
            &StoreOptions::new()
                .with_page_size(7)
                .with_delta_set(true)
                .with_push_first(true),
        );

        assert_eq!(settings.page_size, 7);
        assert!(settings.use_delta_set);
        assert!(!settings.use_auto_pagination);
        assert!(settings.push_first);
        assert_eq!(settings.timeout, Some(Duration::from_secs(30)));
    }

    #[test]
    fn on_cached_is_invoked() {
        use std::sync::atomic::{AtomicUsize, Ordering};

        let seen = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&seen);
        let options = StoreOptions::new().with_on_cached(move |docs| {
            counter.fetch_add(docs.len(), Ordering::SeqCst);
        });

        options.emit_cached(&[Document::new(), Document::new()]);
        assert_eq!(seen.load(Ordering::SeqCst), 2);
        assert!(format!("{options:?}").contains("on_cached: true"));
    }
}
