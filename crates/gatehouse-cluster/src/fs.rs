//! File-backed cluster.
//!
//! Stands in for the distributed cluster in single-node deployments and
//! development: a pool is a directory under the root, a backend object is a
//! regular file, and offset writes/reads map straight onto file I/O. The
//! cluster id is generated once and persisted in the root so it is stable
//! across restarts.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use tokio::fs;
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt, SeekFrom};
use tracing::info;

use crate::error::{ClusterError, Result};
use crate::{format_object_name, Cluster, ClusterStats, PoolIo};

const ID_FILE: &str = ".cluster-id";

pub struct FsCluster {
    root: PathBuf,
    id: String,
    instance_id: u64,
    counter: AtomicU64,
    capacity_kb: u64,
}

impl FsCluster {
    /// Open (or initialize) a cluster rooted at `root`. `capacity_kb` is
    /// the advertised total capacity; the backing filesystem is not
    /// interrogated.
    pub async fn open(root: impl Into<PathBuf>, capacity_kb: u64) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root).await?;

        let id_path = root.join(ID_FILE);
        let id = match fs::read_to_string(&id_path).await {
            Ok(id) => id.trim().to_string(),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                let id = uuid::Uuid::new_v4().to_string();
                fs::write(&id_path, &id).await?;
                id
            }
            Err(e) => return Err(e.into()),
        };

        let instance_id = rand::random::<u32>() as u64;
        info!(cluster = %id, instance_id, root = %root.display(), "cluster ready");
        Ok(Self {
            root,
            id,
            instance_id,
            counter: AtomicU64::new(0),
            capacity_kb,
        })
    }

    fn pool_dir(&self, pool: &str) -> PathBuf {
        self.root.join(pool)
    }
}

#[async_trait]
impl Cluster for FsCluster {
    fn id(&self) -> &str {
        &self.id
    }

    fn instance_id(&self) -> u64 {
        self.instance_id
    }

    fn unique_object_name(&self) -> String {
        format_object_name(self.instance_id, self.counter.fetch_add(1, Ordering::Relaxed) + 1)
    }

    async fn open_pool(&self, pool: &str) -> Result<Box<dyn PoolIo>> {
        let dir = self.pool_dir(pool);
        fs::create_dir_all(&dir).await?;
        Ok(Box::new(FsPool { dir }))
    }

    async fn stats(&self) -> Result<ClusterStats> {
        let root = self.root.clone();
        let used = tokio::task::spawn_blocking(move || dir_size(&root))
            .await
            .map_err(|e| ClusterError::Backend(e.to_string()))??;
        Ok(ClusterStats {
            kb_used: used / 1024,
            kb_total: self.capacity_kb,
        })
    }
}

fn dir_size(dir: &Path) -> Result<u64> {
    let mut total = 0;
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let meta = entry.metadata()?;
        if meta.is_dir() {
            total += dir_size(&entry.path())?;
        } else {
            total += meta.len();
        }
    }
    Ok(total)
}

struct FsPool {
    dir: PathBuf,
}

impl FsPool {
    fn object_path(&self, oid: &str) -> PathBuf {
        self.dir.join(oid)
    }
}

#[async_trait]
impl PoolIo for FsPool {
    async fn write(&self, oid: &str, offset: u64, data: &[u8]) -> Result<()> {
        let mut file = fs::OpenOptions::new()
            .create(true)
            .write(true)
            .open(self.object_path(oid))
            .await?;
        file.seek(SeekFrom::Start(offset)).await?;
        file.write_all(data).await?;
        file.flush().await?;
        Ok(())
    }

    async fn read(&self, oid: &str, offset: u64, buf: &mut [u8]) -> Result<usize> {
        let mut file = match fs::File::open(self.object_path(oid)).await {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(ClusterError::ObjectNotFound(oid.to_string()))
            }
            Err(e) => return Err(e.into()),
        };
        file.seek(SeekFrom::Start(offset)).await?;
        let mut filled = 0;
        while filled < buf.len() {
            let n = file.read(&mut buf[filled..]).await?;
            if n == 0 {
                break;
            }
            filled += n;
        }
        Ok(filled)
    }

    async fn delete(&self, oid: &str) -> Result<()> {
        match fs::remove_file(self.object_path(oid)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
