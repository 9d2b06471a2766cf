//! The lifecycle engine.
//!
//! On every trigger a scanner walks the lifecycle table, claiming idle
//! buckets via the compare-and-set in the metadata store, and feeds them
//! into a bounded queue drained by a fixed pool of workers. Instances of
//! the gateway fleet never coordinate outside the database: the claim is
//! the only mutual exclusion, and the scan-interval floor is what turns
//! "scan periodically" into "at most once per interval per bucket" even
//! across crashes.
//!
//! A trigger that fires while the previous run is still going is skipped
//! with a warning. The stop flag is polled at every task boundary and
//! inside every listing loop; shutdown drains the queue and joins the
//! workers.

use std::str::FromStr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{mpsc, Mutex, Notify};
use tokio::task::JoinSet;
use tracing::{error, info, warn};

use gatehouse_gateway::{Gateway, Result};
use gatehouse_metadata::LifecycleEntry;

use crate::config::EngineConfig;

pub struct LifecycleEngine {
    pub(crate) gateway: Arc<Gateway>,
    config: RwLock<EngineConfig>,
    stop: AtomicBool,
    stop_notify: Notify,
    running: AtomicBool,
    session: AtomicU64,
}

impl LifecycleEngine {
    pub fn new(gateway: Arc<Gateway>, config: EngineConfig) -> Arc<Self> {
        Arc::new(Self {
            gateway,
            config: RwLock::new(config),
            stop: AtomicBool::new(false),
            stop_notify: Notify::new(),
            running: AtomicBool::new(false),
            session: AtomicU64::new(0),
        })
    }

    pub fn request_stop(&self) {
        self.stop.store(true, Ordering::SeqCst);
        self.stop_notify.notify_waiters();
    }

    pub(crate) fn is_stopped(&self) -> bool {
        self.stop.load(Ordering::SeqCst)
    }

    pub fn update_config(&self, config: EngineConfig) {
        *self.config.write().expect("engine config poisoned") = config;
    }

    pub(crate) fn config(&self) -> EngineConfig {
        self.config.read().expect("engine config poisoned").clone()
    }

    /// Drive the cron schedule until stop is requested. The tick itself
    /// runs as its own task so a slow run is observed (and skipped) by the
    /// next trigger rather than delaying it.
    pub async fn run(self: Arc<Self>) {
        let mut in_flight: Option<tokio::task::JoinHandle<()>> = None;
        while !self.is_stopped() {
            let config = self.config();
            let pause = match cron::Schedule::from_str(&config.schedule) {
                Ok(schedule) => match schedule.upcoming(Utc).next() {
                    Some(next) => (next - Utc::now())
                        .to_std()
                        .unwrap_or(Duration::from_secs(1)),
                    None => {
                        warn!(schedule = %config.schedule, "schedule has no upcoming fire time");
                        Duration::from_secs(60)
                    }
                },
                Err(e) => {
                    error!(schedule = %config.schedule, "invalid cron schedule: {e}");
                    Duration::from_secs(60)
                }
            };
            tokio::select! {
                _ = tokio::time::sleep(pause) => {}
                _ = self.stop_notify.notified() => break,
            }
            if self.is_stopped() {
                break;
            }
            if let Some(handle) = &in_flight {
                if !handle.is_finished() {
                    warn!("previous lifecycle run still in progress, skipping this trigger");
                    continue;
                }
            }
            let engine = Arc::clone(&self);
            in_flight = Some(tokio::spawn(async move {
                engine.tick().await;
            }));
        }
        if let Some(handle) = in_flight {
            let _ = handle.await;
        }
    }

    /// One triggered run, guarded against overlap.
    pub async fn tick(self: &Arc<Self>) {
        if self.running.swap(true, Ordering::SeqCst) {
            warn!("lifecycle run already active, skipping");
            return;
        }
        let session = self.session.fetch_add(1, Ordering::SeqCst) + 1;
        info!(session, "lifecycle run starting");
        if let Err(e) = self.run_once().await {
            error!(session, "lifecycle run failed: {e}");
        } else {
            info!(session, "lifecycle run finished");
        }
        self.running.store(false, Ordering::SeqCst);
    }

    /// Scan, claim and process every eligible bucket once.
    pub async fn run_once(self: &Arc<Self>) -> Result<()> {
        let config = self.config();
        let workers = config.workers.max(1);
        let (task_tx, task_rx) = mpsc::channel::<LifecycleEntry>(workers);
        let task_rx = Arc::new(Mutex::new(task_rx));

        let mut pool = JoinSet::new();
        for worker in 0..workers {
            let engine = Arc::clone(self);
            let task_rx = Arc::clone(&task_rx);
            pool.spawn(async move {
                loop {
                    let entry = { task_rx.lock().await.recv().await };
                    let Some(entry) = entry else { break };
                    if engine.is_stopped() {
                        continue;
                    }
                    if let Err(e) = engine.process_bucket(&entry).await {
                        error!(worker, bucket = %entry.bucket, "lifecycle processing failed: {e}");
                    }
                }
            });
        }

        let interval = config.effective_scan_interval();
        let mut marker = String::new();
        'scan: loop {
            if self.is_stopped() {
                break;
            }
            let scan = match self
                .gateway
                .store()
                .scan_lifecycle(workers, &marker, interval)
                .await
            {
                Ok(scan) => scan,
                Err(e) => {
                    // Claimed rows stay claimed; the next trigger retries
                    // the rest.
                    error!("lifecycle scan failed: {e}");
                    break;
                }
            };
            for entry in scan.entries {
                if self.is_stopped() {
                    break 'scan;
                }
                marker = entry.bucket.clone();
                if task_tx.send(entry).await.is_err() {
                    break 'scan;
                }
            }
            if !scan.truncated {
                break;
            }
            if !scan.next_marker.is_empty() {
                marker = scan.next_marker;
            }
        }

        drop(task_tx);
        while pool.join_next().await.is_some() {}
        Ok(())
    }
}
