//! Lifecycle daemon.
//!
//! Reads the shared gateway configuration file, builds the metadata
//! store, cluster connection and gateway in dependency order, and drives
//! the lifecycle cron until a shutdown signal arrives. SIGHUP reloads the
//! configuration file; SIGINT/SIGTERM/SIGQUIT drain the workers and exit
//! cleanly.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tokio::signal::unix::{signal, SignalKind};
use tracing::{info, warn};

use gatehouse_cluster::FsCluster;
use gatehouse_gateway::Gateway;
use gatehouse_lifecycle::{DaemonConfig, LifecycleEngine};
use gatehouse_metadata::MetaStore;

#[derive(Debug, Parser)]
#[command(name = "lifecycled", about = "gatehouse lifecycle daemon")]
struct Args {
    /// Path to the gateway configuration file.
    #[arg(long, default_value = "gatehouse.toml")]
    config: PathBuf,

    /// Debug clock: one rule day lasts one second and the scan-interval
    /// floor shrinks.
    #[arg(long)]
    debug: bool,
}

fn load_config(args: &Args) -> DaemonConfig {
    let mut config = match DaemonConfig::load(&args.config) {
        Ok(config) => config,
        Err(e) => {
            warn!(path = %args.config.display(), "could not read configuration ({e}), using defaults");
            DaemonConfig::default()
        }
    };
    if args.debug {
        config.lifecycle.debug = true;
    }
    config
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let config = load_config(&args);

    let store = Arc::new(MetaStore::new(&config.metadata_path).await?);
    let cluster = Arc::new(
        FsCluster::open(&config.cluster_root, config.cluster_capacity_kb).await?,
    );
    let gateway = Arc::new(Gateway::new(store, cluster, config.gateway.clone())?);
    gateway.bootstrap().await?;

    let engine = LifecycleEngine::new(gateway, config.lifecycle.clone());
    info!(schedule = %config.lifecycle.schedule, workers = config.lifecycle.workers, "lifecycle daemon starting");
    let runner = tokio::spawn(Arc::clone(&engine).run());

    let mut hangup = signal(SignalKind::hangup())?;
    let mut interrupt = signal(SignalKind::interrupt())?;
    let mut terminate = signal(SignalKind::terminate())?;
    let mut quit = signal(SignalKind::quit())?;
    loop {
        tokio::select! {
            _ = hangup.recv() => {
                let fresh = load_config(&args);
                engine.update_config(fresh.lifecycle);
                info!("configuration reloaded");
            }
            _ = interrupt.recv() => break,
            _ = terminate.recv() => break,
            _ = quit.recv() => break,
        }
    }

    info!("shutting down, draining lifecycle workers");
    engine.request_stop();
    let _ = runner.await;
    info!("lifecycle daemon stopped");
    Ok(())
}
