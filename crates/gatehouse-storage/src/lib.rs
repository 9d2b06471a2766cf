//! Payload storage for the gatehouse gateway.
//!
//! This crate moves object bytes between the request path and the backing
//! cluster:
//!
//! - [`StripedDriver`]: write/read/delete of arbitrarily sized payloads,
//!   dispatching on the per-object store-info between the legacy
//!   monolithic path and the striped path (a producer/consumer pipeline
//!   over unit-sized pooled buffers).
//! - [`StripeReader`] / [`LegacyReader`]: lazy byte streams over one
//!   stored object.
//! - [`MultipartReader`]: a contiguous stream over an object assembled
//!   from parts, with optional SSE decryption per part.
//!
//! Nothing here touches metadata rows; the gateway inserts the object row
//! only after the driver reports a successful write, which is what keeps
//! partially written objects invisible.

pub mod buffer;
pub mod driver;
pub mod error;
pub mod legacy;
pub mod multipart;
pub mod reader;
pub mod sse;

pub use buffer::BufferPool;
pub use driver::StripedDriver;
pub use error::{Result, StorageError};
pub use legacy::LegacyReader;
pub use multipart::MultipartReader;
pub use reader::{read_to_end, ObjectReader, StripeReader};
pub use sse::{AlignedDecryptReader, SSE_BLOCK, SSE_IV_LEN, SSE_KEY_LEN};
