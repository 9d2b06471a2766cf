//! In-memory cluster for tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::error::{ClusterError, Result};
use crate::{format_object_name, Cluster, ClusterStats, PoolIo};

type PoolMap = Arc<Mutex<HashMap<String, Vec<u8>>>>;

#[derive(Default)]
pub struct MemoryCluster {
    pools: Mutex<HashMap<String, PoolMap>>,
    counter: AtomicU64,
    instance_id: u64,
}

impl MemoryCluster {
    pub fn new() -> Self {
        Self {
            pools: Mutex::new(HashMap::new()),
            counter: AtomicU64::new(0),
            instance_id: 1,
        }
    }

    /// Number of backend objects currently stored in `pool`.
    pub fn object_count(&self, pool: &str) -> usize {
        self.pools
            .lock()
            .unwrap()
            .get(pool)
            .map(|p| p.lock().unwrap().len())
            .unwrap_or(0)
    }

    /// Names of the backend objects currently stored in `pool`.
    pub fn object_names(&self, pool: &str) -> Vec<String> {
        self.pools
            .lock()
            .unwrap()
            .get(pool)
            .map(|p| p.lock().unwrap().keys().cloned().collect())
            .unwrap_or_default()
    }

    fn pool(&self, name: &str) -> PoolMap {
        self.pools
            .lock()
            .unwrap()
            .entry(name.to_string())
            .or_default()
            .clone()
    }
}

#[async_trait]
impl Cluster for MemoryCluster {
    fn id(&self) -> &str {
        "memory"
    }

    fn instance_id(&self) -> u64 {
        self.instance_id
    }

    fn unique_object_name(&self) -> String {
        format_object_name(self.instance_id, self.counter.fetch_add(1, Ordering::Relaxed) + 1)
    }

    async fn open_pool(&self, pool: &str) -> Result<Box<dyn PoolIo>> {
        Ok(Box::new(MemoryPool {
            objects: self.pool(pool),
        }))
    }

    async fn stats(&self) -> Result<ClusterStats> {
        let pools = self.pools.lock().unwrap();
        let bytes: u64 = pools
            .values()
            .map(|p| p.lock().unwrap().values().map(|o| o.len() as u64).sum::<u64>())
            .sum();
        Ok(ClusterStats {
            kb_used: bytes / 1024,
            kb_total: 1 << 30,
        })
    }
}

struct MemoryPool {
    objects: PoolMap,
}

#[async_trait]
impl PoolIo for MemoryPool {
    async fn write(&self, oid: &str, offset: u64, data: &[u8]) -> Result<()> {
        let mut objects = self.objects.lock().unwrap();
        let object = objects.entry(oid.to_string()).or_default();
        let end = offset as usize + data.len();
        if object.len() < end {
            object.resize(end, 0);
        }
        object[offset as usize..end].copy_from_slice(data);
        Ok(())
    }

    async fn read(&self, oid: &str, offset: u64, buf: &mut [u8]) -> Result<usize> {
        let objects = self.objects.lock().unwrap();
        let object = objects
            .get(oid)
            .ok_or_else(|| ClusterError::ObjectNotFound(oid.to_string()))?;
        let offset = offset as usize;
        if offset >= object.len() {
            return Ok(0);
        }
        let n = buf.len().min(object.len() - offset);
        buf[..n].copy_from_slice(&object[offset..offset + n]);
        Ok(n)
    }

    async fn delete(&self, oid: &str) -> Result<()> {
        self.objects.lock().unwrap().remove(oid);
        Ok(())
    }
}
