//! Read-through metadata cache.
//!
//! Three tables are cached: bucket rows, the per-user bucket list, and
//! latest-object rows. Entries carry a TTL and sit in an LRU per table.
//! Every write path invalidates the affected keys *after* the backing
//! store commit; there is no cross-instance coherence beyond the TTL, and
//! any write corrects staleness locally.

use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use lru::LruCache;
use tokio::sync::RwLock;

use crate::error::Result;
use crate::objects::VersionQuery;
use crate::store::MetaStore;
use crate::types::{Bucket, ObjectMeta};

#[derive(Debug, Clone)]
pub struct CacheConfig {
    pub capacity: usize,
    pub bucket_ttl: Duration,
    pub user_ttl: Duration,
    pub object_ttl: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            capacity: 10_000,
            bucket_ttl: Duration::from_secs(30),
            user_ttl: Duration::from_secs(30),
            object_ttl: Duration::from_secs(5),
        }
    }
}

struct Entry<T> {
    value: T,
    expires_at: Instant,
}

impl<T: Clone> Entry<T> {
    fn new(value: T, ttl: Duration) -> Self {
        Self {
            value,
            expires_at: Instant::now() + ttl,
        }
    }

    fn live(&self) -> Option<T> {
        (Instant::now() < self.expires_at).then(|| self.value.clone())
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct CacheMetrics {
    pub hits: u64,
    pub misses: u64,
}

pub struct MetaCache {
    config: CacheConfig,
    buckets: RwLock<LruCache<String, Entry<Bucket>>>,
    users: RwLock<LruCache<String, Entry<Vec<String>>>>,
    objects: RwLock<LruCache<String, Entry<ObjectMeta>>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl MetaCache {
    pub fn new(config: CacheConfig) -> Self {
        let capacity = NonZeroUsize::new(config.capacity.max(1)).unwrap();
        Self {
            config,
            buckets: RwLock::new(LruCache::new(capacity)),
            users: RwLock::new(LruCache::new(capacity)),
            objects: RwLock::new(LruCache::new(capacity)),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    pub fn metrics(&self) -> CacheMetrics {
        CacheMetrics {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }

    pub async fn bucket(&self, store: &MetaStore, name: &str) -> Result<Bucket> {
        if let Some(bucket) = self.lookup(&self.buckets, name).await {
            return Ok(bucket);
        }
        let bucket = store.get_bucket(name).await?;
        self.buckets
            .write()
            .await
            .put(name.to_string(), Entry::new(bucket.clone(), self.config.bucket_ttl));
        Ok(bucket)
    }

    pub async fn user_buckets(&self, store: &MetaStore, uid: &str) -> Result<Vec<String>> {
        if let Some(names) = self.lookup(&self.users, uid).await {
            return Ok(names);
        }
        let names: Vec<String> = store
            .buckets_of_user(uid)
            .await?
            .into_iter()
            .map(|b| b.name)
            .collect();
        self.users
            .write()
            .await
            .put(uid.to_string(), Entry::new(names.clone(), self.config.user_ttl));
        Ok(names)
    }

    /// Latest-version row of a key (delete markers included, as in the
    /// uncached read).
    pub async fn latest_object(
        &self,
        store: &MetaStore,
        bucket: &str,
        key: &str,
    ) -> Result<ObjectMeta> {
        let cache_key = object_key(bucket, key);
        if let Some(object) = self.lookup(&self.objects, &cache_key).await {
            return Ok(object);
        }
        let object = store.get_object(bucket, key, VersionQuery::Latest).await?;
        self.objects
            .write()
            .await
            .put(cache_key, Entry::new(object.clone(), self.config.object_ttl));
        Ok(object)
    }

    pub async fn invalidate_bucket(&self, name: &str) {
        self.buckets.write().await.pop(name);
    }

    pub async fn invalidate_user(&self, uid: &str) {
        self.users.write().await.pop(uid);
    }

    pub async fn invalidate_object(&self, bucket: &str, key: &str) {
        self.objects.write().await.pop(&object_key(bucket, key));
    }

    async fn lookup<T: Clone>(
        &self,
        table: &RwLock<LruCache<String, Entry<T>>>,
        key: &str,
    ) -> Option<T> {
        let value = table.write().await.get(key).and_then(Entry::live);
        if value.is_some() {
            self.hits.fetch_add(1, Ordering::Relaxed);
        } else {
            self.misses.fetch_add(1, Ordering::Relaxed);
        }
        value
    }
}

fn object_key(bucket: &str, key: &str) -> String {
    format!("{bucket}\u{0}{key}")
}
