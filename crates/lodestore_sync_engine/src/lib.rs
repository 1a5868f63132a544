//! # Lodestore Sync Engine
//!
//! Offline-first document stores backed by a REST backend.
//!
//! This crate provides:
//! - A local document cache per collection and tag
//! - A sync log holding at most one pending mutation per entity
//! - A query cache enabling delta-set pulls
//! - Push and pull pipelines (full, delta-set and auto-paginated)
//! - The [`Store`] façade and the [`Datastore`] root handle
//! - The [`Transport`] abstraction with an HTTP and a loopback implementation
//!
//! ## Architecture
//!
//! Writes always land locally first:
//! 1. The document is saved in the local cache
//! 2. The mutation is recorded in the sync log
//! 3. With auto-sync, the entity is pushed right away
//!
//! [`Store::sync`] pushes before it pulls, never the reverse, so pending
//! local edits are never overwritten by older backend state.
//!
//! ## Key Invariants
//!
//! - One sync log entry per entity
//! - One push in flight per collection and tag
//! - Storage access is serialized per datastore
//! - A failed entity never aborts a push; any failure aborts a pull

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod cache;
mod config;
mod datastore;
mod error;
mod http;
mod loopback;
mod network;
mod pull;
mod push;
mod query_cache;
mod serial;
mod store;
mod sync_log;
mod transport;

pub use config::{
    CachedCallback, DatastoreConfig, StoreConfig, StoreOptions, DEFAULT_NAMESPACE,
    DEFAULT_PAGE_CONCURRENCY, DEFAULT_PAGE_SIZE, DEFAULT_PUSH_CONCURRENCY,
};
pub use datastore::Datastore;
pub use error::{SyncError, SyncResult};
pub use http::{HttpTransport, SessionProvider, StaticSession};
pub use loopback::{LoopbackBackend, RecordedRequest};
pub use push::PushResult;
pub use store::{Store, SyncOutcome};
pub use transport::{AuthMode, Method, Request, Response, Transport, REQUEST_START_HEADER};

pub use lodestore_sync_protocol::{Query, QueryCacheEntry, SyncLogEntry, SyncOperation};
