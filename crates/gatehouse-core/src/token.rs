//! Opaque ListObjectsV2 continuation tokens.
//!
//! The token is the internal key marker, XXTEA-encrypted under a
//! process-wide key and base64-framed. Clients treat it as opaque; any
//! token that fails to decrypt or decode is rejected as invalid rather
//! than interpreted. Rotating the key (a reconfiguration) invalidates all
//! in-flight tokens by design.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;

use crate::error::{CoreError, Result};
use crate::version::{xxtea_decrypt_bytes, xxtea_encrypt_bytes};

#[derive(Debug, Clone)]
pub struct ContinuationTokenCodec {
    key: [u8; 16],
}

impl ContinuationTokenCodec {
    pub fn new(key: [u8; 16]) -> Self {
        Self { key }
    }

    pub fn encode(&self, marker: &str) -> String {
        BASE64.encode(xxtea_encrypt_bytes(marker.as_bytes(), &self.key))
    }

    pub fn decode(&self, token: &str) -> Result<String> {
        let cipher = BASE64
            .decode(token)
            .map_err(|_| CoreError::InvalidContinuationToken)?;
        let plain =
            xxtea_decrypt_bytes(&cipher, &self.key).ok_or(CoreError::InvalidContinuationToken)?;
        String::from_utf8(plain).map_err(|_| CoreError::InvalidContinuationToken)
    }
}
