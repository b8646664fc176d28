//! abx-server binary: admin API plus the background pipeline, wired over
//! the in-process broker and a local snapshot directory.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use abx_broker::{topics, PartitionedEventLog, Record};
use abx_sdk::{AbClient, SdkConfig};
use abx_server::{AbxServer, AppState, OutboxWorker, ServerConfig, SnapshotGenerator};
use abx_store::{ExperimentStore, LocalDirObjectStore};

#[derive(Parser)]
#[command(name = "abx-server", about = "A/B experimentation platform server")]
#[command(version)]
struct Cli {
    /// SQLite database path.
    #[arg(long, default_value = "abx.db")]
    db_path: PathBuf,

    /// Directory used as the snapshot bucket.
    #[arg(long, default_value = "snapshots")]
    snapshot_dir: PathBuf,

    /// Host to bind.
    #[arg(long, default_value = "127.0.0.1")]
    host: String,

    /// Port to bind.
    #[arg(long, default_value_t = 8080)]
    port: u16,

    /// Outbox drain interval in milliseconds.
    #[arg(long, default_value_t = 2000)]
    outbox_tick_ms: u64,

    /// Snapshot regeneration interval in seconds.
    #[arg(long, default_value_t = 60)]
    snapshot_interval_secs: u64,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let cli = Cli::parse();

    let store = Arc::new(
        ExperimentStore::open(&cli.db_path)
            .with_context(|| format!("opening database at {}", cli.db_path.display()))?,
    );
    let object_store = Arc::new(
        LocalDirObjectStore::open(&cli.snapshot_dir)
            .await
            .with_context(|| format!("opening snapshot dir {}", cli.snapshot_dir.display()))?,
    );

    // In-process topics. A multi-node deployment swaps these for a real
    // broker client behind the same traits.
    let delta_log = Arc::new(PartitionedEventLog::<Record>::new());
    let meta_log = Arc::new(PartitionedEventLog::<Record>::new());
    let assignment_log = Arc::new(PartitionedEventLog::<Record>::new());
    info!(
        deltas = topics::DELTAS,
        snapshots = topics::SNAPSHOTS_META,
        assignments = topics::ASSIGNMENT_EVENTS,
        "in-process topics ready"
    );

    let shutdown = CancellationToken::new();

    let outbox_handle = OutboxWorker::new(store.clone(), delta_log.clone())
        .with_tick(Duration::from_millis(cli.outbox_tick_ms))
        .spawn(shutdown.clone());

    let generator = SnapshotGenerator::new(store.clone(), object_store.clone(), meta_log.clone());
    // Seed the bucket before the SDK bootstraps.
    if let Err(e) = generator.run_once().await {
        warn!(error = %e, "initial snapshot generation failed");
    }
    let snapshot_handle = generator.spawn(
        Duration::from_secs(cli.snapshot_interval_secs),
        shutdown.clone(),
    );

    let decider = match AbClient::connect(
        SdkConfig::default()
            .with_group_id(format!("abx-server-{}", uuid::Uuid::new_v4()))
            .with_startup_jitter(Duration::ZERO),
        object_store.clone(),
        delta_log.clone(),
        assignment_log.clone(),
    )
    .await
    {
        Ok(client) => Some(Arc::new(client)),
        Err(e) => {
            warn!(error = %e, "decision engine unavailable until experiments exist");
            None
        }
    };

    let mut state = AppState::new(store);
    if let Some(decider) = decider {
        state = state.with_decider(decider);
    }

    let server = AbxServer::new(
        ServerConfig {
            host: cli.host,
            port: cli.port,
        },
        Arc::new(state),
    );

    tokio::select! {
        result = server.run() => result.context("server failed")?,
        _ = tokio::signal::ctrl_c() => info!("shutdown signal received"),
    }

    shutdown.cancel();
    for handle in [outbox_handle, snapshot_handle] {
        if let Err(e) = handle.await {
            warn!(error = %e, "worker task panicked during shutdown");
        }
    }
    info!("abx-server stopped");
    Ok(())
}
