//! Core types shared by every gatehouse crate.
//!
//! This crate has no I/O. It holds the pure pieces of the gateway:
//!
//! - **Stripe planner** ([`stripe`]): maps logical byte ranges onto the
//!   fixed-size backend object pool (stripe unit / stripe count / object
//!   size, Ceph-style).
//! - **Store info** ([`store_info`]): the tagged per-object storage
//!   descriptor persisted in the object row. The storage driver decodes it
//!   to pick the legacy monolithic path or the striped path.
//! - **Versions** ([`version`]): the internal monotonic version key
//!   (`u64::MAX - last_modified_nanos`, so newer rows sort first) and the
//!   reversible S3 version-id encoding.
//! - **Continuation tokens** ([`token`]): the opaque ListObjectsV2 cursor.
//! - **Lifecycle rules** ([`rules`]): bucket lifecycle configuration and
//!   validation.

pub mod error;
pub mod rules;
pub mod store_info;
pub mod stripe;
pub mod token;
pub mod version;

pub use error::{CoreError, Result};
pub use rules::{LifecycleConfiguration, Rule, RuleStatus};
pub use store_info::{StoreInfo, StripeGeometry};
pub use stripe::{BackendObject, StripePlanner, StripeSlice};
pub use token::ContinuationTokenCodec;
pub use version::{InternalVersion, VersionCodec, NULL_VERSION_ID};
