//! Server-side-encryption read boundary.
//!
//! Payloads are encrypted per part with AES-256-CTR under the object key
//! and the part IV. CTR keeps byte positions stable, so a ranged read only
//! needs the backend read to start on a cipher-block boundary: the reader
//! below is handed a stream that begins at the aligned offset, runs the
//! keystream from there, and discards the head padding before returning
//! plaintext. Key unwrapping (the KMS envelope) happens outside the core;
//! this module only consumes the raw key.

use aes::Aes256;
use async_trait::async_trait;
use ctr::cipher::{KeyIvInit, StreamCipher, StreamCipherSeek};
use ctr::Ctr128BE;

use crate::error::{Result, StorageError};
use crate::reader::ObjectReader;

pub type Aes256Ctr = Ctr128BE<Aes256>;

/// Cipher block size; backend reads under SSE start on this alignment.
pub const SSE_BLOCK: usize = 16;

pub const SSE_KEY_LEN: usize = 32;
pub const SSE_IV_LEN: usize = 16;

/// Round a plaintext offset down to the cipher-block boundary the backend
/// read must start at.
pub fn aligned_offset(plain_offset: u64) -> u64 {
    plain_offset - plain_offset % SSE_BLOCK as u64
}

fn build_cipher(key: &[u8; SSE_KEY_LEN], iv: &[u8]) -> Result<Aes256Ctr> {
    let iv: [u8; SSE_IV_LEN] = iv
        .try_into()
        .map_err(|_| StorageError::Sse(format!("IV must be {SSE_IV_LEN} bytes, got {}", iv.len())))?;
    Ok(Aes256Ctr::new(key.into(), &iv.into()))
}

/// Encrypt (or decrypt: CTR is symmetric) `data` in place as the bytes at
/// `plain_offset` of the stream.
pub fn apply_keystream_at(
    key: &[u8; SSE_KEY_LEN],
    iv: &[u8],
    plain_offset: u64,
    data: &mut [u8],
) -> Result<()> {
    let mut cipher = build_cipher(key, iv)?;
    cipher.seek(plain_offset);
    cipher.apply_keystream(data);
    Ok(())
}

/// Decrypting reader over a backend stream that starts at the aligned
/// offset below `plain_offset`. The head padding is consumed and thrown
/// away on the first read.
pub struct AlignedDecryptReader {
    inner: Box<dyn ObjectReader>,
    cipher: Aes256Ctr,
    skip: usize,
}

impl AlignedDecryptReader {
    pub fn new(
        inner: Box<dyn ObjectReader>,
        key: &[u8; SSE_KEY_LEN],
        iv: &[u8],
        plain_offset: u64,
    ) -> Result<Self> {
        let mut cipher = build_cipher(key, iv)?;
        let aligned = aligned_offset(plain_offset);
        cipher.seek(aligned);
        Ok(Self {
            inner,
            cipher,
            skip: (plain_offset - aligned) as usize,
        })
    }
}

#[async_trait]
impl ObjectReader for AlignedDecryptReader {
    async fn read(&mut self, p: &mut [u8]) -> Result<usize> {
        let mut scratch = [0u8; SSE_BLOCK];
        while self.skip > 0 {
            let want = self.skip.min(SSE_BLOCK);
            let n = self.inner.read(&mut scratch[..want]).await?;
            if n == 0 {
                return Ok(0);
            }
            // Run the keystream over the padding to keep positions aligned.
            self.cipher.apply_keystream(&mut scratch[..n]);
            self.skip -= n;
        }
        let n = self.inner.read(p).await?;
        self.cipher.apply_keystream(&mut p[..n]);
        Ok(n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct SliceReader(Vec<u8>);

    #[async_trait]
    impl ObjectReader for SliceReader {
        async fn read(&mut self, p: &mut [u8]) -> Result<usize> {
            let n = p.len().min(self.0.len());
            p[..n].copy_from_slice(&self.0[..n]);
            self.0.drain(..n);
            Ok(n)
        }
    }

    #[tokio::test]
    async fn decrypts_from_unaligned_offsets() {
        let key = [7u8; SSE_KEY_LEN];
        let iv = [9u8; SSE_IV_LEN];
        let plain: Vec<u8> = (0..200u8).collect();
        let mut encrypted = plain.clone();
        apply_keystream_at(&key, &iv, 0, &mut encrypted).unwrap();

        for offset in [0u64, 1, 15, 16, 17, 33, 160] {
            let aligned = aligned_offset(offset) as usize;
            let inner = SliceReader(encrypted[aligned..].to_vec());
            let mut reader =
                AlignedDecryptReader::new(Box::new(inner), &key, &iv, offset).unwrap();
            let got = crate::reader::read_to_end(&mut reader).await.unwrap();
            assert_eq!(got, plain[offset as usize..], "offset {offset}");
        }
    }

    #[tokio::test]
    async fn rejects_bad_iv() {
        let inner = SliceReader(Vec::new());
        assert!(AlignedDecryptReader::new(Box::new(inner), &[0u8; 32], &[1, 2, 3], 0).is_err());
    }
}
