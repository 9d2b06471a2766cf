//! Legacy monolithic driver.
//!
//! Objects written before striping (and appendable objects) live as one
//! backend blob under the parent oid. Appends are offset writes at the
//! current size; the gateway validates the position before calling in.

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncReadExt};

use gatehouse_cluster::{Cluster, PoolIo};

use crate::error::{Result, StorageError};
use crate::reader::ObjectReader;

const WRITE_CHUNK: usize = 4 << 20;

pub(crate) async fn write<R>(
    cluster: &dyn Cluster,
    pool: &str,
    oid: &str,
    offset: u64,
    reader: &mut R,
) -> Result<u64>
where
    R: AsyncRead + Unpin + Send + ?Sized,
{
    let pool_io = cluster.open_pool(pool).await?;
    let mut buf = vec![0u8; WRITE_CHUNK];
    let mut position = offset;
    let mut written = 0u64;
    loop {
        let mut filled = 0usize;
        let mut eof = false;
        while filled < buf.len() {
            let n = reader.read(&mut buf[filled..]).await?;
            if n == 0 {
                eof = true;
                break;
            }
            filled += n;
        }
        if filled > 0 {
            pool_io.write(oid, position, &buf[..filled]).await?;
            position += filled as u64;
            written += filled as u64;
        }
        if eof {
            return Ok(written);
        }
    }
}

pub(crate) async fn delete(cluster: &dyn Cluster, pool: &str, oid: &str) -> Result<()> {
    let pool_io = cluster.open_pool(pool).await?;
    pool_io.delete(oid).await?;
    Ok(())
}

pub struct LegacyReader {
    pool: Box<dyn PoolIo>,
    oid: String,
    offset: u64,
    remaining: u64,
}

impl LegacyReader {
    pub fn new(pool: Box<dyn PoolIo>, oid: String, offset: u64, length: u64) -> Self {
        Self {
            pool,
            oid,
            offset,
            remaining: length,
        }
    }
}

#[async_trait]
impl ObjectReader for LegacyReader {
    async fn read(&mut self, p: &mut [u8]) -> Result<usize> {
        if self.remaining == 0 || p.is_empty() {
            return Ok(0);
        }
        let want = (self.remaining as usize).min(p.len());
        let n = self.pool.read(&self.oid, self.offset, &mut p[..want]).await?;
        if n > want {
            return Err(StorageError::Corrupt {
                oid: self.oid.clone(),
                want: want as u64,
                got: n as u64,
            });
        }
        if n == 0 {
            return Err(StorageError::UnexpectedEof {
                oid: self.oid.clone(),
                offset: self.offset,
            });
        }
        self.offset += n as u64;
        self.remaining -= n as u64;
        Ok(n)
    }
}
