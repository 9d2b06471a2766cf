//! Bucket lifecycle enforcement for the gatehouse fleet.
//!
//! Buckets with a non-empty lifecycle configuration are enrolled in a
//! shared table; on a cron trigger each gateway instance scans that table
//! and claims idle buckets through a compare-and-set on the last-scanned
//! clock, giving eventual (not wall-clock-precise) expiration with an
//! at-most-once-per-interval guarantee per bucket across the fleet.
//!
//! The `lifecycled` binary wraps the engine with configuration loading,
//! SIGHUP reload, and graceful SIGINT/SIGTERM/SIGQUIT shutdown.

mod actions;
pub mod config;
pub mod engine;

pub use config::{DaemonConfig, EngineConfig};
pub use engine::LifecycleEngine;
