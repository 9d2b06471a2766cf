//! Row types for the metadata store.
//!
//! Timestamps are stored as integers: milliseconds since epoch for bucket
//! and multipart rows, nanoseconds for object rows (the nanosecond value is
//! what the internal version key is derived from, so both stay in step).

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};
use gatehouse_core::{InternalVersion, LifecycleConfiguration, StoreInfo};
use serde::{Deserialize, Serialize};

/// Bucket versioning state. Once a bucket leaves `Disabled` it can only
/// move between `Enabled` and `Suspended`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VersioningState {
    Disabled,
    Enabled,
    Suspended,
}

impl VersioningState {
    pub fn as_str(&self) -> &'static str {
        match self {
            VersioningState::Disabled => "Disabled",
            VersioningState::Enabled => "Enabled",
            VersioningState::Suspended => "Suspended",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "Disabled" => Some(VersioningState::Disabled),
            "Enabled" => Some(VersioningState::Enabled),
            "Suspended" => Some(VersioningState::Suspended),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectKind {
    Normal,
    Appendable,
    Multipart,
}

impl ObjectKind {
    pub fn as_i64(&self) -> i64 {
        match self {
            ObjectKind::Normal => 0,
            ObjectKind::Appendable => 1,
            ObjectKind::Multipart => 2,
        }
    }

    pub fn from_i64(v: i64) -> Self {
        match v {
            1 => ObjectKind::Appendable,
            2 => ObjectKind::Multipart,
            _ => ObjectKind::Normal,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StorageClass {
    #[default]
    Standard,
    InfrequentAccess,
    Glacier,
}

impl StorageClass {
    pub fn as_i64(&self) -> i64 {
        match self {
            StorageClass::Standard => 0,
            StorageClass::InfrequentAccess => 1,
            StorageClass::Glacier => 2,
        }
    }

    pub fn from_i64(v: i64) -> Self {
        match v {
            1 => StorageClass::InfrequentAccess,
            2 => StorageClass::Glacier,
            _ => StorageClass::Standard,
        }
    }
}

/// Canned ACL. The full grant model lives in the IAM boundary; the core
/// only needs the canned name for owner checks and persistence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Acl {
    pub canned: String,
}

impl Default for Acl {
    fn default() -> Self {
        Self {
            canned: "private".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CorsRule {
    pub allowed_origins: Vec<String>,
    pub allowed_methods: Vec<String>,
    #[serde(default)]
    pub allowed_headers: Vec<String>,
    #[serde(default)]
    pub expose_headers: Vec<String>,
    #[serde(default)]
    pub max_age_seconds: Option<u32>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CorsConfiguration {
    #[serde(default)]
    pub rules: Vec<CorsRule>,
}

impl CorsConfiguration {
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WebsiteConfiguration {
    #[serde(default)]
    pub index_document: Option<String>,
    #[serde(default)]
    pub error_document: Option<String>,
    #[serde(default)]
    pub redirect_all_requests_to: Option<String>,
}

impl WebsiteConfiguration {
    pub fn is_empty(&self) -> bool {
        self.index_document.is_none()
            && self.error_document.is_none()
            && self.redirect_all_requests_to.is_none()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BucketLoggingStatus {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub target_bucket: String,
    #[serde(default)]
    pub target_prefix: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Bucket {
    pub name: String,
    pub owner_id: String,
    pub create_time: DateTime<Utc>,
    pub update_time: Option<DateTime<Utc>>,
    pub versioning: VersioningState,
    pub acl: Acl,
    pub cors: CorsConfiguration,
    pub lifecycle: LifecycleConfiguration,
    pub policy: serde_json::Value,
    pub website: WebsiteConfiguration,
    pub logging: BucketLoggingStatus,
    pub usage: i64,
    pub file_count: i64,
}

impl Bucket {
    pub fn new(name: impl Into<String>, owner_id: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            owner_id: owner_id.into(),
            create_time: Utc::now(),
            update_time: None,
            versioning: VersioningState::Disabled,
            acl: Acl::default(),
            cors: CorsConfiguration::default(),
            lifecycle: LifecycleConfiguration::default(),
            policy: serde_json::Value::Null,
            website: WebsiteConfiguration::default(),
            logging: BucketLoggingStatus::default(),
            usage: 0,
            file_count: 0,
        }
    }

    /// Enabled and Suspended buckets may hold several versions per key.
    pub fn is_versioned(&self) -> bool {
        self.versioning != VersioningState::Disabled
    }
}

/// One part of a multipart object, owned by exactly one object version (or
/// by one in-flight upload before completion).
#[derive(Debug, Clone, PartialEq)]
pub struct Part {
    pub part_number: u32,
    pub size: u64,
    pub object_id: String,
    /// Byte offset of this part within the logical object. Zero until the
    /// upload completes and the offsets are laid out.
    pub offset: u64,
    pub etag: String,
    pub last_modified: DateTime<Utc>,
    pub iv: Vec<u8>,
    pub store_info: StoreInfo,
}

/// One object version row.
#[derive(Debug, Clone, PartialEq)]
pub struct ObjectMeta {
    pub bucket: String,
    pub key: String,
    pub version: InternalVersion,
    pub location: String,
    pub pool: String,
    pub owner_id: String,
    pub size: u64,
    pub object_id: String,
    pub last_modified: DateTime<Utc>,
    pub etag: String,
    pub content_type: String,
    pub custom_attributes: HashMap<String, String>,
    pub acl: Acl,
    pub null_version: bool,
    pub delete_marker: bool,
    pub sse_type: String,
    pub encryption_key: Vec<u8>,
    pub iv: Vec<u8>,
    pub kind: ObjectKind,
    pub storage_class: StorageClass,
    pub is_latest: bool,
    pub store_info: StoreInfo,
    /// Part map, keyed by part number. Empty for single-payload objects.
    pub parts: BTreeMap<u32, Part>,
}

impl ObjectMeta {
    pub fn is_multipart(&self) -> bool {
        !self.parts.is_empty()
    }
}

/// An in-flight multipart upload (part rows are fetched separately).
#[derive(Debug, Clone, PartialEq)]
pub struct MultipartUpload {
    pub bucket: String,
    pub key: String,
    pub upload_id: String,
    pub initiator_id: String,
    pub owner_id: String,
    pub initiated: DateTime<Utc>,
    pub content_type: String,
    pub acl: Acl,
    pub sse_type: String,
    pub encryption_key: Vec<u8>,
    pub pool: String,
    pub storage_class: StorageClass,
    pub attrs: HashMap<String, String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleStatus {
    Pending,
    Ending,
}

impl LifecycleStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            LifecycleStatus::Pending => "Pending",
            LifecycleStatus::Ending => "Ending",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "Ending" => LifecycleStatus::Ending,
            _ => LifecycleStatus::Pending,
        }
    }
}

/// Row of the lifecycle table: admits a bucket to the periodic scan.
#[derive(Debug, Clone, PartialEq)]
pub struct LifecycleEntry {
    pub bucket: String,
    pub status: LifecycleStatus,
    /// Unix seconds of the last successful claim.
    pub last_scanned: i64,
}

#[derive(Debug, Clone, Default)]
pub struct LifecycleScan {
    pub entries: Vec<LifecycleEntry>,
    pub truncated: bool,
    pub next_marker: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BucketUsage {
    pub usage_bytes: i64,
    pub file_count: i64,
}

pub(crate) fn unix_nanos(t: &DateTime<Utc>) -> u64 {
    t.timestamp_nanos_opt().map(|n| n as u64).unwrap_or(0)
}

pub(crate) fn from_unix_nanos(nanos: u64) -> DateTime<Utc> {
    DateTime::from_timestamp_nanos(nanos as i64)
}

pub(crate) fn from_unix_millis(millis: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(millis).unwrap_or(DateTime::UNIX_EPOCH)
}
