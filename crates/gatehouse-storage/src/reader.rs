//! Byte-stream readers over backend objects.
//!
//! [`ObjectReader`] is the stream shape every read path produces: the
//! striped reader here, the legacy reader, and the multipart reader. A
//! short count is a valid read (callers loop); zero means end of stream.

use async_trait::async_trait;

use gatehouse_cluster::PoolIo;
use gatehouse_core::StripePlanner;

use crate::error::{Result, StorageError};

#[async_trait]
pub trait ObjectReader: Send {
    /// Fill `p` with the next bytes of the stream. Returns 0 only at end
    /// of stream.
    async fn read(&mut self, p: &mut [u8]) -> Result<usize>;
}

/// Drain a reader to a vector. Test and copy helper.
pub async fn read_to_end(reader: &mut dyn ObjectReader) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    let mut buf = vec![0u8; 64 << 10];
    loop {
        let n = reader.read(&mut buf).await?;
        if n == 0 {
            return Ok(out);
        }
        out.extend_from_slice(&buf[..n]);
    }
}

/// Lazy reader over a striped object: each call plans the backend runs
/// covering the current position and issues one backend read per run.
pub struct StripeReader {
    pool: Box<dyn PoolIo>,
    planner: StripePlanner,
    parent: String,
    offset: u64,
    remaining: u64,
}

impl StripeReader {
    pub fn new(
        pool: Box<dyn PoolIo>,
        planner: StripePlanner,
        parent: String,
        offset: u64,
        length: u64,
    ) -> Self {
        Self {
            pool,
            planner,
            parent,
            offset,
            remaining: length,
        }
    }
}

#[async_trait]
impl ObjectReader for StripeReader {
    async fn read(&mut self, p: &mut [u8]) -> Result<usize> {
        if self.remaining == 0 || p.is_empty() {
            return Ok(0);
        }
        let mut copied = 0usize;
        while copied < p.len() && self.remaining > 0 {
            let slice = self.planner.locate(self.offset, self.remaining);
            let want = (slice.usable as usize).min(p.len() - copied);
            let oid = slice.oid(&self.parent);
            let n = self
                .pool
                .read(&oid, slice.offset, &mut p[copied..copied + want])
                .await?;
            if n > want {
                return Err(StorageError::Corrupt {
                    oid,
                    want: want as u64,
                    got: n as u64,
                });
            }
            if n == 0 {
                // Bytes inside the logical range must exist on the backend.
                return Err(StorageError::UnexpectedEof {
                    oid,
                    offset: slice.offset,
                });
            }
            copied += n;
            self.offset += n as u64;
            self.remaining -= n as u64;
        }
        Ok(copied)
    }
}
