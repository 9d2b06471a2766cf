//! Access to the backing object cluster.
//!
//! The storage driver talks to the cluster through two seams:
//!
//! - [`Cluster`]: the process-wide connection. Opened once at startup,
//!   shared read-only behind an `Arc`, torn down last. It also mints the
//!   unique upload names (`"{instance_id}:{counter}"`) that become the
//!   parent oid of every new object.
//! - [`PoolIo`]: a handle onto one storage pool, scoped to a single driver
//!   call and released on every exit path by dropping it.
//!
//! ## Operation contract
//!
//! - `write(oid, offset, data)` writes all of `data` at `offset` or fails.
//! - `read(oid, offset, buf)` returns short counts only at the end of the
//!   backend object. A count larger than the buffer cannot be represented
//!   here; the driver still treats any overrun it derives as corruption.
//! - `delete(oid)` is idempotent: deleting an absent object succeeds.
//!
//! Two backends are provided: a file-backed cluster ([`FsCluster`], one
//! directory per pool, one file per backend object) and an in-memory
//! cluster ([`MemoryCluster`]) used by tests.

pub mod error;
pub mod fs;
pub mod memory;

use async_trait::async_trait;

pub use error::{ClusterError, Result};
pub use fs::FsCluster;
pub use memory::MemoryCluster;

/// Aggregate cluster capacity, in kilobytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClusterStats {
    pub kb_used: u64,
    pub kb_total: u64,
}

impl ClusterStats {
    pub fn used_percent(&self) -> u32 {
        if self.kb_total == 0 {
            return 0;
        }
        (self.kb_used * 100 / self.kb_total) as u32
    }
}

/// Process-wide connection to the backing cluster.
#[async_trait]
pub trait Cluster: Send + Sync {
    /// Stable cluster identity (the fsid of the backing cluster).
    fn id(&self) -> &str;

    /// Identity of this gateway instance within the cluster.
    fn instance_id(&self) -> u64;

    /// Mint a cluster-unique object name: `"{instance_id}:{counter}"`.
    fn unique_object_name(&self) -> String;

    /// Open a handle onto one pool. Handles are cheap and scoped to a
    /// single call.
    async fn open_pool(&self, pool: &str) -> Result<Box<dyn PoolIo>>;

    async fn stats(&self) -> Result<ClusterStats>;
}

/// I/O against a single pool.
#[async_trait]
pub trait PoolIo: Send + Sync {
    async fn write(&self, oid: &str, offset: u64, data: &[u8]) -> Result<()>;

    /// Fill `buf` from `offset`, returning the count read. Short only at
    /// the end of the backend object.
    async fn read(&self, oid: &str, offset: u64, buf: &mut [u8]) -> Result<usize>;

    /// Delete `oid`. Absent objects are not an error.
    async fn delete(&self, oid: &str) -> Result<()>;
}

pub(crate) fn format_object_name(instance_id: u64, counter: u64) -> String {
    format!("{instance_id}:{counter}")
}
