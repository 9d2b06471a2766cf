//! Internal object versions and the S3 version-id wire encoding.
//!
//! The internal version of an object row is `u64::MAX - last_modified_unix_nanos`,
//! so that ascending order by version is descending order by time: the row
//! with the *smallest* version is the newest. The database stores the value
//! as a fixed-width 20-digit decimal key so lexicographic ordering matches
//! numeric ordering.
//!
//! The externally visible S3 version id is the XXTEA encryption of the
//! decimal key, hex-encoded. The cipher key is process-wide and stable so
//! clients can round-trip ids across requests; rotating it invalidates
//! every id previously handed out. The sentinel id `"null"` addresses the
//! row whose null-version flag is set and never goes through the cipher.

use crate::error::{CoreError, Result};

/// Sentinel S3 version id selecting the null-version row.
pub const NULL_VERSION_ID: &str = "null";

const DB_KEY_WIDTH: usize = 20;

/// Internal monotonic version key. Smaller means newer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct InternalVersion(pub u64);

impl InternalVersion {
    pub fn from_modified_nanos(nanos: u64) -> Self {
        Self(u64::MAX - nanos)
    }

    pub fn modified_nanos(&self) -> u64 {
        u64::MAX - self.0
    }

    /// Fixed-width decimal form used as the database column value.
    pub fn db_key(&self) -> String {
        format!("{:0width$}", self.0, width = DB_KEY_WIDTH)
    }

    pub fn from_db_key(key: &str) -> Result<Self> {
        key.parse::<u64>()
            .map(Self)
            .map_err(|_| CoreError::InvalidVersionId)
    }
}

/// Process-wide codec between internal versions and S3 version ids.
#[derive(Debug, Clone)]
pub struct VersionCodec {
    key: [u32; 4],
}

impl VersionCodec {
    pub fn new(key: [u8; 16]) -> Self {
        Self {
            key: key_words(&key),
        }
    }

    pub fn encode(&self, version: InternalVersion) -> String {
        hex::encode(xxtea_encrypt(version.db_key().as_bytes(), &self.key))
    }

    pub fn decode(&self, version_id: &str) -> Result<InternalVersion> {
        let cipher = hex::decode(version_id).map_err(|_| CoreError::InvalidVersionId)?;
        let plain = xxtea_decrypt(&cipher, &self.key).ok_or(CoreError::InvalidVersionId)?;
        let text = std::str::from_utf8(&plain).map_err(|_| CoreError::InvalidVersionId)?;
        InternalVersion::from_db_key(text)
    }
}

// XXTEA (corrected block TEA), operating on little-endian u32 words with a
// trailing length word. Small enough that carrying a dependency for it is
// not worth the surface.

const DELTA: u32 = 0x9E37_79B9;

fn key_words(key: &[u8; 16]) -> [u32; 4] {
    let mut words = [0u32; 4];
    for (i, chunk) in key.chunks_exact(4).enumerate() {
        words[i] = u32::from_le_bytes(chunk.try_into().unwrap());
    }
    words
}

pub(crate) fn xxtea_encrypt_bytes(data: &[u8], key: &[u8; 16]) -> Vec<u8> {
    xxtea_encrypt(data, &key_words(key))
}

pub(crate) fn xxtea_decrypt_bytes(data: &[u8], key: &[u8; 16]) -> Option<Vec<u8>> {
    xxtea_decrypt(data, &key_words(key))
}

fn mx(sum: u32, y: u32, z: u32, p: u32, e: u32, key: &[u32; 4]) -> u32 {
    ((z >> 5 ^ y << 2).wrapping_add(y >> 3 ^ z << 4))
        ^ ((sum ^ y).wrapping_add(key[((p & 3) ^ e) as usize] ^ z))
}

fn to_words(data: &[u8], include_length: bool) -> Vec<u32> {
    let n = (data.len() + 3) / 4;
    let mut words = vec![0u32; if include_length { n + 1 } else { n }];
    for (i, b) in data.iter().enumerate() {
        words[i / 4] |= (*b as u32) << ((i % 4) * 8);
    }
    if include_length {
        words[n] = data.len() as u32;
    }
    words
}

fn from_words(words: &[u32], include_length: bool) -> Option<Vec<u8>> {
    let data_words = if include_length {
        &words[..words.len().checked_sub(1)?]
    } else {
        words
    };
    let mut bytes = Vec::with_capacity(data_words.len() * 4);
    for w in data_words {
        bytes.extend_from_slice(&w.to_le_bytes());
    }
    if include_length {
        let n = *words.last()? as usize;
        if n > bytes.len() {
            return None;
        }
        bytes.truncate(n);
    }
    Some(bytes)
}

fn encrypt_words(v: &mut [u32], key: &[u32; 4]) {
    let n = v.len();
    if n < 2 {
        return;
    }
    let rounds = 6 + 52 / n;
    let mut sum = 0u32;
    let mut z = v[n - 1];
    for _ in 0..rounds {
        sum = sum.wrapping_add(DELTA);
        let e = (sum >> 2) & 3;
        for p in 0..n - 1 {
            let y = v[p + 1];
            v[p] = v[p].wrapping_add(mx(sum, y, z, p as u32, e, key));
            z = v[p];
        }
        let y = v[0];
        v[n - 1] = v[n - 1].wrapping_add(mx(sum, y, z, (n - 1) as u32, e, key));
        z = v[n - 1];
    }
}

fn decrypt_words(v: &mut [u32], key: &[u32; 4]) {
    let n = v.len();
    if n < 2 {
        return;
    }
    let rounds = 6 + 52 / n;
    let mut sum = (rounds as u32).wrapping_mul(DELTA);
    let mut y = v[0];
    while sum != 0 {
        let e = (sum >> 2) & 3;
        for p in (1..n).rev() {
            let z = v[p - 1];
            v[p] = v[p].wrapping_sub(mx(sum, y, z, p as u32, e, key));
            y = v[p];
        }
        let z = v[n - 1];
        v[0] = v[0].wrapping_sub(mx(sum, y, z, 0, e, key));
        y = v[0];
        sum = sum.wrapping_sub(DELTA);
    }
}

fn xxtea_encrypt(data: &[u8], key: &[u32; 4]) -> Vec<u8> {
    let mut words = to_words(data, true);
    encrypt_words(&mut words, key);
    from_words(&words, false).unwrap_or_default()
}

fn xxtea_decrypt(data: &[u8], key: &[u32; 4]) -> Option<Vec<u8>> {
    if data.is_empty() || data.len() % 4 != 0 {
        return None;
    }
    let mut words = to_words(data, false);
    decrypt_words(&mut words, key);
    from_words(&words, true)
}
