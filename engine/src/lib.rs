//! # Ferry Engine
//!
//! Offline-first sync core for remote object records.
//!
//! This crate keeps a local, indexed cache of records fetched from a remote
//! object server, lets the application read and write through that cache
//! while offline, and pushes local changes back with conflict detection.
//!
//! ## Core Concepts
//!
//! ### Records
//!
//! A [`Record`] is a JSON object keyed by a configurable key field (`Id` by
//! default). Cached records carry three dirty flags, `locallyCreated`,
//! `locallyUpdated` and `locallyDeleted`, plus the derived `local`. Records
//! created offline get a local id (`local_<n>`) until the server assigns one.
//!
//! ### Record cache
//!
//! [`RecordCache`] wraps one soup of a [`LocalStore`]. Writes resolve
//! against the stored copy with a [`WriteMergeMode`]:
//! - [`WriteMergeMode::Overwrite`] - replace the stored record
//! - [`WriteMergeMode::MergeAcceptTheirs`] - overlay new fields (default)
//! - [`WriteMergeMode::LeaveIfChanged`] - keep records with local changes
//!
//! ### Routing
//!
//! [`sync_remote_object`] performs a CRUD method against the cache, the
//! server or both, chosen by [`CacheMode`]. Server results are written back
//! into the cache.
//!
//! ### Conflict detection
//!
//! [`sync_remote_object_detect_conflict`] keeps a second cache of the last
//! known server copies and compares base, theirs and yours before an update
//! or delete. A rejected call returns [`Error::Conflict`] carrying a
//! [`ConflictReport`].
//!
//! ## Quick Start
//!
//! ```rust
//! use ferry_engine::{
//!     is_local_id, sync_remote_object, CacheMode, CrudMethod, MemoryRemote, MemoryStore,
//!     RecordCache, RemoteObjectSync,
//! };
//! use serde_json::json;
//! use std::sync::Arc;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), ferry_engine::Error> {
//! // 1. Open a cache over a local store
//! let cache = RecordCache::with_defaults(Arc::new(MemoryStore::new()), "accounts");
//! cache.init().await?;
//!
//! // 2. Point the router at a server
//! let server = RemoteObjectSync::new(Arc::new(MemoryRemote::new()), "Account");
//!
//! // 3. Create a record while offline
//! let attributes = json!({"Name": "Bond"}).as_object().cloned().unwrap_or_default();
//! let outcome = sync_remote_object(
//!     CrudMethod::Create,
//!     None,
//!     &attributes,
//!     Some(&["Name"]),
//!     Some(&cache),
//!     CacheMode::CacheOnly,
//!     &server,
//! )
//! .await?;
//!
//! let record = outcome.record.unwrap_or_default();
//! assert!(is_local_id(record["Id"].as_str().unwrap_or_default()));
//! # Ok(())
//! # }
//! ```
//!
//! ## HTTP
//!
//! With the `http` feature, [`HttpRemoteClient`] talks to an object server
//! such as `ferry-server` over REST.

pub mod bulk;
pub mod cache;
pub mod config;
pub mod conflict;
pub mod error;
#[cfg(feature = "http")]
pub mod http;
pub mod mode;
pub mod query;
pub mod record;
pub mod remote;
pub mod router;
pub mod store;

// Re-export main types at crate root
pub use bulk::{sync_down, sync_up, SyncUpReport};
pub use cache::{CacheQueryResult, RecordCache};
pub use config::CacheConfig;
pub use conflict::{diff, loosely_equal, sync_remote_object_detect_conflict, ConflictReport};
pub use error::{Error, RemoteError, Result, StoreError};
#[cfg(feature = "http")]
pub use http::HttpRemoteClient;
pub use mode::{CacheMode, ConflictMergeMode, CrudMethod, WriteMergeMode};
pub use query::{IndexSpec, IndexType, Order, QueryKind, QueryPage, QuerySpec};
pub use record::{add_local_fields, is_local, is_local_id, make_local_id, Record};
pub use remote::{
    CallCounts, MemoryRemote, RemoteClient, RemoteObjectSync, RemoteResult, ServerSync,
};
pub use router::{
    sync_remote_object, sync_remote_object_with_cache, sync_remote_object_with_server,
    SyncOutcome,
};
pub use store::{LocalStore, MemoryStore, StoreResult};

