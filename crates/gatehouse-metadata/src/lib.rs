//! Relational metadata for the gatehouse gateway.
//!
//! While payload bytes live on the backing object cluster, everything the
//! gateway knows *about* them lives here:
//!
//! - **Buckets** and their configuration (ACL, CORS, lifecycle, policy,
//!   website, logging, versioning state, usage counters)
//! - **Object versions**, keyed `(bucket, key, internal_version)` with the
//!   `islatest` / `nullversion` / `deletemarker` flags
//! - **Parts** owned by multipart object versions
//! - **In-flight multipart uploads** and their part rows
//! - **Lifecycle enrolment**, the table the scan engine claims buckets from
//! - **Cluster placement** and per-instance configuration
//!
//! The store is SQLite via `sqlx`; schema migrations ship in
//! `migrations/`. Composite mutations (a versioned PUT is an insert, a
//! latest-flip and a usage update) run inside a [`MetaTx`] owned by the
//! caller. The [`cache`] module adds a read-through LRU in front of the
//! hot lookups.

pub mod cache;
pub mod error;
pub mod listing;
pub mod objects;
pub mod store;
pub mod types;

pub use cache::{CacheConfig, CacheMetrics, MetaCache};
pub use error::{MetadataError, Result};
pub use listing::{ListObjectsPage, ListObjectsQuery, ListUploadsPage, ListUploadsQuery};
pub use objects::VersionQuery;
pub use store::{MetaStore, MetaTx};
pub use types::*;
