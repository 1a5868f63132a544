//! # Lodestore Storage
//!
//! Storage adapter trait and implementations for lodestore.
//!
//! This crate provides the lowest-level persistence abstraction used by the
//! sync engine. Adapters are **per-collection document stores** addressed by
//! `(namespace, collection)`. They do not interpret documents beyond the
//! `_id` field used as the primary key.
//!
//! ## Design Principles
//!
//! - Adapters are simple document stores (count, find, save, remove, clear)
//! - No knowledge of sync logs, query caches or `_kmd` metadata
//! - Must be `Send + Sync` so one adapter can back many stores
//! - Serialization of concurrent access is the caller's job
//!
//! ## Available Adapters
//!
//! - [`InMemoryAdapter`] - For testing and ephemeral caches
//! - [`FileAdapter`] - One JSON file per collection on the local file system
//!
//! ## Example
//!
//! ```rust
//! use lodestore_storage::{Document, InMemoryAdapter, StorageAdapter};
//! use serde_json::json;
//!
//! # tokio_test_block(async {
//! let adapter = InMemoryAdapter::new();
//! let doc: Document = json!({"_id": "a", "title": "hello"}).as_object().cloned().unwrap();
//! adapter.save("appdata", "books", vec![doc]).await.unwrap();
//! assert_eq!(adapter.count("appdata", "books").await.unwrap(), 1);
//! # });
//! # fn tokio_test_block<F: std::future::Future>(f: F) -> F::Output {
//! #     tokio::runtime::Builder::new_current_thread().build().unwrap().block_on(f)
//! # }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod adapter;
mod error;
mod file;
mod memory;

pub use adapter::{document_id, Document, StorageAdapter, ID_ATTRIBUTE};
pub use error::{StorageError, StorageResult};
pub use file::FileAdapter;
pub use memory::InMemoryAdapter;
