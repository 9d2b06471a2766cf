//! The gatehouse object gateway.
//!
//! [`Gateway`] is the context struct the whole system hangs off: the
//! metadata store and its cache, the cluster connection, the striped
//! driver, and the process-wide codecs for version ids and continuation
//! tokens. It is built once at startup (after logging and configuration,
//! before any server or cron loop) and shared behind an `Arc`.
//!
//! Operations are grouped the way the S3 surface is: bucket operations in
//! [`buckets`], object operations in [`objects`], multipart uploads in
//! [`multipart`]. The HTTP framing, XML rendering and signature check all
//! live outside this crate; requests arrive here as plain structs plus a
//! [`Credential`].

pub mod buckets;
pub mod error;
pub mod multipart;
pub mod objects;
mod util;

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use gatehouse_cluster::Cluster;
use gatehouse_core::{ContinuationTokenCodec, StripeGeometry, VersionCodec};
use gatehouse_metadata::{Bucket, CacheConfig, MetaCache, MetaStore, ObjectMeta};
use gatehouse_storage::StripedDriver;

pub use error::{GatewayError, Result};

/// The caller identity the IAM boundary resolved for this request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credential {
    pub user_id: String,
}

impl Credential {
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// Pool new objects are written to when the cluster table has no
    /// placement row.
    pub pool: String,
    /// Stripe geometry for newly written objects. Existing objects keep
    /// the geometry recorded in their store-info.
    pub geometry: StripeGeometry,
    /// 128-bit key (hex) for the version-id and continuation-token
    /// codecs. Rotating it invalidates all ids and tokens in flight.
    pub secret_key: String,
    pub cache_capacity: usize,
    pub bucket_cache_ttl_secs: u64,
    pub object_cache_ttl_secs: u64,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            pool: "tiger".to_string(),
            geometry: StripeGeometry {
                object_size: 4 << 20,
                unit: 512 << 10,
                stripe_count: 4,
            },
            secret_key: "2f5e4a1b9c8d07361504f3a2b1c0d9e8".to_string(),
            cache_capacity: 10_000,
            bucket_cache_ttl_secs: 30,
            object_cache_ttl_secs: 5,
        }
    }
}

impl GatewayConfig {
    fn secret_key_bytes(&self) -> Result<[u8; 16]> {
        let bytes = hex::decode(&self.secret_key)
            .map_err(|_| GatewayError::Internal("secret_key must be hex".into()))?;
        bytes
            .try_into()
            .map_err(|_| GatewayError::Internal("secret_key must be 16 bytes of hex".into()))
    }

    fn cache_config(&self) -> CacheConfig {
        CacheConfig {
            capacity: self.cache_capacity,
            bucket_ttl: std::time::Duration::from_secs(self.bucket_cache_ttl_secs),
            user_ttl: std::time::Duration::from_secs(self.bucket_cache_ttl_secs),
            object_ttl: std::time::Duration::from_secs(self.object_cache_ttl_secs),
        }
    }
}

pub struct Gateway {
    pub(crate) store: Arc<MetaStore>,
    pub(crate) cache: MetaCache,
    pub(crate) cluster: Arc<dyn Cluster>,
    pub(crate) driver: Arc<StripedDriver>,
    pub(crate) versions: VersionCodec,
    pub(crate) tokens: ContinuationTokenCodec,
    pub(crate) config: GatewayConfig,
}

impl Gateway {
    pub fn new(
        store: Arc<MetaStore>,
        cluster: Arc<dyn Cluster>,
        config: GatewayConfig,
    ) -> Result<Self> {
        let key = config.secret_key_bytes()?;
        Ok(Self {
            cache: MetaCache::new(config.cache_config()),
            driver: Arc::new(StripedDriver::new(Arc::clone(&cluster))),
            versions: VersionCodec::new(key),
            tokens: ContinuationTokenCodec::new(key),
            cluster,
            store,
            config,
        })
    }

    /// Register this instance in the shared tables: the cluster placement
    /// row for the configured pool and the per-instance configuration.
    pub async fn bootstrap(&self) -> Result<()> {
        self.store
            .put_cluster_pool(self.cluster.id(), &self.config.pool, 1)
            .await?;
        let instance = format!("{}:{}", self.cluster.id(), self.cluster.instance_id());
        let config = serde_json::to_value(&self.config)
            .map_err(|e| GatewayError::Internal(e.to_string()))?;
        self.store.save_instance_config(&instance, &config).await?;
        Ok(())
    }

    pub fn store(&self) -> &Arc<MetaStore> {
        &self.store
    }

    pub fn cluster(&self) -> &Arc<dyn Cluster> {
        &self.cluster
    }

    /// Pool for new writes: the cluster placement table first, the
    /// configured default second.
    pub(crate) async fn write_pool(&self) -> Result<String> {
        Ok(self
            .store
            .pick_pool(self.cluster.id())
            .await?
            .unwrap_or_else(|| self.config.pool.clone()))
    }

    pub(crate) async fn load_bucket(&self, name: &str) -> Result<Bucket> {
        Ok(self.cache.bucket(&self.store, name).await?)
    }

    pub(crate) fn check_owner(&self, bucket: &Bucket, credential: &Credential) -> Result<()> {
        if bucket.owner_id != credential.user_id {
            return Err(GatewayError::AccessDenied);
        }
        Ok(())
    }

    pub(crate) fn check_read_access(&self, bucket: &Bucket, credential: &Credential) -> Result<()> {
        if bucket.owner_id == credential.user_id || bucket.acl.canned.starts_with("public-read") {
            return Ok(());
        }
        Err(GatewayError::AccessDenied)
    }

    /// Externally visible version id of a row: the null sentinel for the
    /// null-version row, the encrypted internal version otherwise.
    pub fn version_id_string(&self, object: &ObjectMeta) -> String {
        if object.null_version {
            gatehouse_core::NULL_VERSION_ID.to_string()
        } else {
            self.versions.encode(object.version)
        }
    }
}
