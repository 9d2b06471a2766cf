//! The striped storage driver.
//!
//! The driver turns an incoming byte stream into backend writes laid out
//! by the stripe planner, and byte streams back out of the backend on
//! read. The per-object store-info selects the path: empty/legacy meta
//! goes to the monolithic driver, striped meta to the pipeline here.
//!
//! ## Write pipeline
//!
//! One reader side (the calling task) and one writer task, joined by two
//! bounded channels: a data channel of unit-sized buffers and a result
//! channel carrying `(bytes_written, error)`.
//!
//! - The reader fills a pool buffer until full or EOF, polling the result
//!   channel without blocking between source reads so a backend failure
//!   aborts the upload without draining the source.
//! - The writer plans each buffer into `(oid, intra offset, usable)` runs,
//!   writes them, and returns the buffer to the pool. Its first error goes
//!   onto the result channel and ends the task.
//!
//! Memory in flight is bounded by two stripe units per request. A failed
//! write leaves partial backend objects behind; they are unreferenced
//! (the object row is only inserted after a successful write) and the
//! garbage collector reaps them.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TryRecvError;
use tracing::{debug, error};

use gatehouse_cluster::Cluster;
use gatehouse_core::{StoreInfo, StripeGeometry, StripePlanner};

use crate::buffer::BufferPool;
use crate::error::{Result, StorageError};
use crate::legacy::{self, LegacyReader};
use crate::reader::{ObjectReader, StripeReader};

struct GeometryHandle {
    planner: StripePlanner,
    buffers: BufferPool,
}

struct Chunk {
    buf: Vec<u8>,
    len: usize,
}

struct WriteOutcome {
    written: u64,
    error: Option<StorageError>,
}

pub struct StripedDriver {
    cluster: Arc<dyn Cluster>,
    geometries: RwLock<HashMap<StripeGeometry, Arc<GeometryHandle>>>,
}

impl StripedDriver {
    pub fn new(cluster: Arc<dyn Cluster>) -> Self {
        Self {
            cluster,
            geometries: RwLock::new(HashMap::new()),
        }
    }

    pub fn cluster(&self) -> &Arc<dyn Cluster> {
        &self.cluster
    }

    /// Stream `reader` into the object at `offset`, returning the bytes
    /// written.
    pub async fn write<R>(
        &self,
        pool: &str,
        object_id: &str,
        store_info: &StoreInfo,
        offset: u64,
        reader: &mut R,
    ) -> Result<u64>
    where
        R: AsyncRead + Unpin + Send + ?Sized,
    {
        match store_info {
            StoreInfo::LegacyMonolithic => {
                legacy::write(self.cluster.as_ref(), pool, object_id, offset, reader).await
            }
            StoreInfo::Striped(geometry) => {
                self.write_striped(pool, object_id, *geometry, offset, reader)
                    .await
            }
        }
    }

    /// A lazy byte stream over `[offset, offset + length)` of the object.
    pub async fn read(
        &self,
        pool: &str,
        object_id: &str,
        store_info: &StoreInfo,
        offset: u64,
        length: u64,
    ) -> Result<Box<dyn ObjectReader>> {
        let pool_io = self.cluster.open_pool(pool).await?;
        match store_info {
            StoreInfo::LegacyMonolithic => Ok(Box::new(LegacyReader::new(
                pool_io,
                object_id.to_string(),
                offset,
                length,
            ))),
            StoreInfo::Striped(geometry) => {
                let handle = self.geometry_handle(*geometry)?;
                Ok(Box::new(StripeReader::new(
                    pool_io,
                    handle.planner,
                    object_id.to_string(),
                    offset,
                    length,
                )))
            }
        }
    }

    /// Blind-delete every backend object of a logical object of
    /// `logical_size` bytes. Missing backend objects are not an error.
    pub async fn delete(
        &self,
        pool: &str,
        object_id: &str,
        store_info: &StoreInfo,
        logical_size: u64,
    ) -> Result<()> {
        match store_info {
            StoreInfo::LegacyMonolithic => {
                legacy::delete(self.cluster.as_ref(), pool, object_id).await
            }
            StoreInfo::Striped(geometry) => {
                let handle = self.geometry_handle(*geometry)?;
                let pool_io = self.cluster.open_pool(pool).await?;
                for oid in handle.planner.covering_oids(object_id, logical_size) {
                    pool_io.delete(&oid).await?;
                }
                Ok(())
            }
        }
    }

    async fn write_striped<R>(
        &self,
        pool: &str,
        object_id: &str,
        geometry: StripeGeometry,
        offset: u64,
        reader: &mut R,
    ) -> Result<u64>
    where
        R: AsyncRead + Unpin + Send + ?Sized,
    {
        let handle = self.geometry_handle(geometry)?;
        let pool_io = self.cluster.open_pool(pool).await?;

        // data_ch is closed by the reader side, result_ch by the writer.
        let (data_tx, mut data_rx) = mpsc::channel::<Chunk>(1);
        let (result_tx, mut result_rx) = mpsc::channel::<WriteOutcome>(1);

        let writer = {
            let handle = Arc::clone(&handle);
            let parent = object_id.to_string();
            tokio::spawn(async move {
                let mut outcome = WriteOutcome {
                    written: 0,
                    error: None,
                };
                let mut position = offset;
                while let Some(chunk) = data_rx.recv().await {
                    let mut consumed = 0usize;
                    while consumed < chunk.len {
                        let remaining = (chunk.len - consumed) as u64;
                        let slice = handle.planner.locate(position, remaining);
                        let usable = slice.usable as usize;
                        let oid = slice.oid(&parent);
                        if let Err(e) = pool_io
                            .write(&oid, slice.offset, &chunk.buf[consumed..consumed + usable])
                            .await
                        {
                            error!(oid = %oid, offset = slice.offset, "backend write failed: {e}");
                            outcome.error = Some(e.into());
                            break;
                        }
                        consumed += usable;
                        position += slice.usable;
                        outcome.written += slice.usable;
                    }
                    handle.buffers.put(chunk.buf);
                    if outcome.error.is_some() {
                        break;
                    }
                }
                let _ = result_tx.send(outcome).await;
            })
        };

        let mut eof = false;
        let mut source_error: Option<StorageError> = None;
        while !eof {
            let mut buf = handle.buffers.take();
            let mut filled = 0usize;
            while filled < buf.len() {
                // Abort early if the writer already failed.
                match result_rx.try_recv() {
                    Ok(outcome) => {
                        handle.buffers.put(buf);
                        drop(data_tx);
                        let _ = writer.await;
                        return Err(outcome.error.unwrap_or_else(|| {
                            StorageError::Internal("write pipeline ended early".into())
                        }));
                    }
                    Err(TryRecvError::Empty) => {}
                    Err(TryRecvError::Disconnected) => {
                        handle.buffers.put(buf);
                        let _ = writer.await;
                        return Err(StorageError::Internal(
                            "write pipeline result channel closed".into(),
                        ));
                    }
                }
                match reader.read(&mut buf[filled..]).await {
                    Ok(0) => {
                        eof = true;
                        break;
                    }
                    Ok(n) => filled += n,
                    Err(e) => {
                        source_error = Some(e.into());
                        break;
                    }
                }
            }

            if let Some(e) = source_error.take() {
                handle.buffers.put(buf);
                drop(data_tx);
                // Let the writer drain what it already has.
                let _ = result_rx.recv().await;
                let _ = writer.await;
                return Err(e);
            }

            if filled > 0 {
                if let Err(send_error) = data_tx.send(Chunk { buf, len: filled }).await {
                    // Writer bailed out after a backend error; collect it.
                    handle.buffers.put(send_error.0.buf);
                    break;
                }
            } else {
                handle.buffers.put(buf);
            }
        }

        drop(data_tx);
        let outcome = result_rx
            .recv()
            .await
            .ok_or_else(|| StorageError::Internal("write pipeline did not report".into()))?;
        writer
            .await
            .map_err(|e| StorageError::Internal(e.to_string()))?;
        match outcome.error {
            Some(error) => Err(error),
            None => {
                debug!(object_id, written = outcome.written, "striped write complete");
                Ok(outcome.written)
            }
        }
    }

    /// Geometry handles are shared per driver; insertion is double-checked
    /// so parallel writers with the same geometry end up with one handle
    /// and one buffer pool.
    fn geometry_handle(&self, geometry: StripeGeometry) -> Result<Arc<GeometryHandle>> {
        if let Some(handle) = self
            .geometries
            .read()
            .expect("geometry table poisoned")
            .get(&geometry)
        {
            return Ok(Arc::clone(handle));
        }
        let mut table = self.geometries.write().expect("geometry table poisoned");
        if let Some(handle) = table.get(&geometry) {
            return Ok(Arc::clone(handle));
        }
        let handle = Arc::new(GeometryHandle {
            planner: StripePlanner::new(geometry)?,
            buffers: BufferPool::new(geometry.unit as usize),
        });
        table.insert(geometry, Arc::clone(&handle));
        Ok(handle)
    }
}
