//! Lifecycle engine and daemon configuration.

use std::path::Path;

use serde::{Deserialize, Serialize};

use gatehouse_gateway::GatewayConfig;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Cron expression (with seconds field) for the scan trigger.
    pub schedule: String,
    /// Worker tasks draining the claimed-bucket queue.
    pub workers: usize,
    /// Claim floor: a bucket is eligible again once its last scan is at
    /// least this old.
    pub scan_interval_secs: i64,
    /// Claim floor in debug mode.
    pub debug_scan_interval_secs: i64,
    /// Debug mode: one rule "day" lasts one second and the debug claim
    /// floor applies.
    pub debug: bool,
    /// Page size for the engine's internal listings.
    pub request_max_keys: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            schedule: "0 0 2 * * *".to_string(),
            workers: 4,
            scan_interval_secs: 12 * 3600,
            debug_scan_interval_secs: 15,
            debug: false,
            request_max_keys: 1000,
        }
    }
}

impl EngineConfig {
    pub fn effective_scan_interval(&self) -> i64 {
        if self.debug {
            self.debug_scan_interval_secs
        } else {
            self.scan_interval_secs
        }
    }

    /// Rule ages are expressed in days; in debug mode a day is a second.
    pub fn seconds_per_day(&self) -> i64 {
        if self.debug {
            1
        } else {
            86_400
        }
    }
}

/// Everything the lifecycle daemon reads from its configuration file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonConfig {
    pub metadata_path: String,
    pub cluster_root: String,
    pub cluster_capacity_kb: u64,
    #[serde(default)]
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub lifecycle: EngineConfig,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            metadata_path: "gatehouse.db".to_string(),
            cluster_root: "cluster-data".to_string(),
            cluster_capacity_kb: 1 << 30,
            gateway: GatewayConfig::default(),
            lifecycle: EngineConfig::default(),
        }
    }
}

impl DaemonConfig {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&raw)?)
    }
}
