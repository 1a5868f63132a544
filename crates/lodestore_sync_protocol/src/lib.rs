//! # Lodestore Sync Protocol
//!
//! Sync log, query and wire types for lodestore.
//!
//! This crate provides:
//! - Document metadata helpers (`_id`, `_kmd.local`)
//! - [`Query`], the predicate engine used by caches and pull requests
//! - [`SyncOperation`] and [`SyncLogEntry`] with the per-entity collapse rule
//! - [`QueryCacheEntry`] for delta-set bookkeeping
//! - Wire bodies exchanged with the backend (delta sets, counts, errors)
//!
//! This is a pure protocol crate with no I/O operations.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod cache_entry;
mod entry;
mod error;
mod messages;
mod metadata;
mod operation;
mod query;

pub use cache_entry::QueryCacheEntry;
pub use entry::{collapse, Collapse, SyncLogEntry};
pub use error::{ProtocolError, ProtocolResult};
pub use messages::{CountResponse, DeletedRef, DeltaSetResponse, ErrorBody};
pub use metadata::{clear_local, ensure_id, generate_id, is_local, mark_local, KMD_ATTRIBUTE};
pub use operation::SyncOperation;
pub use query::{Query, SortOrder};

pub use lodestore_storage::{document_id, Document, ID_ATTRIBUTE};
