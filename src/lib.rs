//! # Document Store
//!
//! An embeddable, file-backed document store: an in-process table of
//! loosely-structured JSON documents queried with a small predicate language
//! and persisted durably to disk.
//!
//! ## Core Concepts
//!
//! - **Documents**: JSON mappings carrying an `id` field, kept in an
//!   insertion-ordered table
//! - **Queries**: field literals plus `$gt`/`$lt`/`$in`/`$regex`-style
//!   operators, with date coercion
//! - **Write-ahead log**: every mutation is durable before it is applied,
//!   and replayed over the last snapshot on startup
//! - **Debounced snapshots**: bursts of mutations coalesce into a single
//!   atomic rewrite of the primary file
//!
//! ## Example
//!
//! ```ignore
//! use docstore::{Store, StoreConfig, QueryOptions, SortDirection};
//! use serde_json::json;
//!
//! let store = Store::open(StoreConfig::new("./todos.json"))?;
//!
//! store.insert(json!({"title": "write docs", "done": false}).as_object().unwrap().clone())?;
//!
//! let open = store.query(
//!     json!({"done": false}).as_object().unwrap(),
//!     &QueryOptions::sorted_by("title", SortDirection::Ascending),
//! );
//!
//! // Everything above is on disk once this returns.
//! store.commit()?;
//! ```

pub mod error;
pub mod matcher;
mod scheduler;
mod snapshot;
pub mod store;
mod table;
pub mod types;
pub mod wal;

// Re-exports
pub use error::{Result, StoreError};
pub use matcher::matches;
pub use store::{Store, StoreConfig};
pub use types::{Document, Mutation, Query, QueryOptions, RecoveryReport, SortDirection};
pub use wal::{WalRecord, WriteAheadLog};
