//! Contiguous reads over multipart objects.
//!
//! A multipart-completed object owns an ordered part map; parts are
//! non-overlapping, contiguous, and sum to the logical size. The reader
//! binary-searches the part start offsets for the current position, chains
//! per-part readers from the driver, and optionally wraps each in the
//! aligned SSE decryptor keyed by the object key and the part IV.

use std::sync::Arc;

use async_trait::async_trait;

use gatehouse_metadata::ObjectMeta;

use crate::driver::StripedDriver;
use crate::error::{Result, StorageError};
use crate::reader::ObjectReader;
use crate::sse::{aligned_offset, AlignedDecryptReader, SSE_KEY_LEN};

pub struct MultipartReader {
    driver: Arc<StripedDriver>,
    object: ObjectMeta,
    /// Part numbers in offset order and their start offsets; derived from
    /// the part map on construction, never persisted.
    order: Vec<u32>,
    offsets: Vec<u64>,
    offset: u64,
    remaining: u64,
    sse_key: Option<[u8; SSE_KEY_LEN]>,
}

impl MultipartReader {
    pub fn new(
        driver: Arc<StripedDriver>,
        object: ObjectMeta,
        offset: u64,
        length: u64,
        sse_key: Option<[u8; SSE_KEY_LEN]>,
    ) -> Self {
        let order: Vec<u32> = object.parts.keys().copied().collect();
        let offsets: Vec<u64> = order.iter().map(|n| object.parts[n].offset).collect();
        Self {
            driver,
            object,
            order,
            offsets,
            offset,
            remaining: length,
            sse_key,
        }
    }

    /// Index of the part holding `offset`: the greatest start offset not
    /// beyond it.
    fn part_index(&self, offset: u64) -> usize {
        self.offsets.partition_point(|&start| start <= offset).saturating_sub(1)
    }
}

#[async_trait]
impl ObjectReader for MultipartReader {
    async fn read(&mut self, p: &mut [u8]) -> Result<usize> {
        if self.remaining == 0 || self.order.is_empty() || p.is_empty() {
            return Ok(0);
        }
        if let Some(last) = self.order.last() {
            let last_part = &self.object.parts[last];
            if self.offset >= last_part.offset + last_part.size {
                return Ok(0);
            }
        }

        let mut copied = 0usize;
        while copied < p.len() && self.remaining > 0 {
            let idx = self.part_index(self.offset);
            if idx >= self.order.len() {
                break;
            }
            let part = &self.object.parts[&self.order[idx]];
            let part_offset = part.offset;
            let part_size = part.size;
            let part_oid = part.object_id.clone();
            let part_iv = part.iv.clone();
            let part_store_info = part.store_info;

            if part_offset >= self.offset + self.remaining {
                break;
            }
            let intra = self.offset - part_offset;
            if intra >= part_size {
                // Past the final part.
                break;
            }
            let span = (part_size - intra)
                .min(self.remaining)
                .min((p.len() - copied) as u64);

            let mut reader: Box<dyn ObjectReader> = match self.sse_key {
                None => {
                    self.driver
                        .read(&self.object.pool, &part_oid, &part_store_info, intra, span)
                        .await?
                }
                Some(key) => {
                    let aligned = aligned_offset(intra);
                    let inner = self
                        .driver
                        .read(
                            &self.object.pool,
                            &part_oid,
                            &part_store_info,
                            aligned,
                            span + (intra - aligned),
                        )
                        .await?;
                    Box::new(AlignedDecryptReader::new(inner, &key, &part_iv, intra)?)
                }
            };

            let mut got = 0u64;
            while got < span {
                let n = reader
                    .read(&mut p[copied + got as usize..copied + span as usize])
                    .await?;
                if n == 0 {
                    return Err(StorageError::UnexpectedEof {
                        oid: part_oid,
                        offset: intra + got,
                    });
                }
                got += n as u64;
            }
            copied += span as usize;
            self.offset += span;
            self.remaining -= span;
        }
        Ok(copied)
    }
}
