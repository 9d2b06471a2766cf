//! Per-object storage descriptor.
//!
//! Every object row carries an opaque `meta` string the storage driver
//! decodes to choose a data path. The empty string and the legacy tag both
//! select the old monolithic driver (one backend blob per object); the
//! striped tag carries the stripe geometry. Geometry is immutable once
//! written: changing the configured default never rewrites existing
//! objects.

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, Result};

/// Stripe geometry: backend object size, stripe unit and stripe count.
/// Invariants (`unit <= object_size`, `object_size % unit == 0`) are
/// enforced when a planner is built from it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StripeGeometry {
    #[serde(rename = "objectSize")]
    pub object_size: u64,
    #[serde(rename = "stripeUnit")]
    pub unit: u64,
    #[serde(rename = "stripeNum")]
    pub stripe_count: u32,
}

const DRIVER_LEGACY: u8 = 0;
const DRIVER_STRIPED: u8 = 1;

/// Tagged storage descriptor, JSON-encoded into the object row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreInfo {
    /// Single opaque blob at one backend oid (pre-striping objects, and
    /// appendable objects).
    LegacyMonolithic,
    /// Striped layout with the recorded geometry.
    Striped(StripeGeometry),
}

#[derive(Serialize, Deserialize)]
struct WireStoreInfo {
    #[serde(rename = "type")]
    driver: u8,
    #[serde(flatten)]
    geometry: StripeGeometry,
}

impl StoreInfo {
    pub fn is_striped(&self) -> bool {
        matches!(self, StoreInfo::Striped(_))
    }

    /// Serialize for the object row. The legacy variant encodes as the
    /// empty string, which is also what rows written before striping carry.
    pub fn encode(&self) -> Result<String> {
        match self {
            StoreInfo::LegacyMonolithic => Ok(String::new()),
            StoreInfo::Striped(geometry) => serde_json::to_string(&WireStoreInfo {
                driver: DRIVER_STRIPED,
                geometry: *geometry,
            })
            .map_err(|e| CoreError::InvalidStoreInfo(e.to_string())),
        }
    }

    pub fn decode(raw: &str) -> Result<Self> {
        if raw.is_empty() {
            return Ok(StoreInfo::LegacyMonolithic);
        }
        let wire: WireStoreInfo = serde_json::from_str(raw)
            .map_err(|e| CoreError::InvalidStoreInfo(format!("{raw:?}: {e}")))?;
        match wire.driver {
            DRIVER_LEGACY => Ok(StoreInfo::LegacyMonolithic),
            DRIVER_STRIPED => Ok(StoreInfo::Striped(wire.geometry)),
            other => Err(CoreError::InvalidStoreInfo(format!(
                "unknown driver tag {other}"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_meta_is_legacy() {
        assert_eq!(StoreInfo::decode("").unwrap(), StoreInfo::LegacyMonolithic);
        assert_eq!(StoreInfo::LegacyMonolithic.encode().unwrap(), "");
    }

    #[test]
    fn striped_round_trip() {
        let info = StoreInfo::Striped(StripeGeometry {
            object_size: 4 << 20,
            unit: 2 << 20,
            stripe_count: 5,
        });
        let encoded = info.encode().unwrap();
        assert_eq!(StoreInfo::decode(&encoded).unwrap(), info);
    }

    #[test]
    fn garbage_meta_is_rejected() {
        assert!(StoreInfo::decode("not json").is_err());
        assert!(StoreInfo::decode(r#"{"type":9,"objectSize":1,"stripeUnit":1,"stripeNum":1}"#).is_err());
    }
}
