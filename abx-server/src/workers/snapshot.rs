//! The snapshot generator.
//!
//! Serializes all active experiments into one JSON array, uploads it
//! under a key embedding the highest config version observed, and
//! publishes a metadata record. Re-running at the same version overwrites
//! an identical object, so the operation is idempotent by key.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use abx_broker::{EventLog, Record};
use abx_store::{ExperimentStore, ObjectStore};
use abx_types::SnapshotMeta;

use super::WorkerError;

/// Publishes full snapshots of the active experiment set.
pub struct SnapshotGenerator {
    store: Arc<ExperimentStore>,
    object_store: Arc<dyn ObjectStore>,
    meta_log: Arc<dyn EventLog<Record>>,
}

impl SnapshotGenerator {
    pub fn new(
        store: Arc<ExperimentStore>,
        object_store: Arc<dyn ObjectStore>,
        meta_log: Arc<dyn EventLog<Record>>,
    ) -> Self {
        Self {
            store,
            object_store,
            meta_log,
        }
    }

    /// Generate and upload one snapshot.
    ///
    /// Returns the metadata record, or `None` when there are no active
    /// experiments to snapshot.
    pub async fn run_once(&self) -> Result<Option<SnapshotMeta>, WorkerError> {
        let experiments = self.store.find_all_active()?;
        if experiments.is_empty() {
            info!("no active experiments, snapshot not generated");
            return Ok(None);
        }

        let version = experiments
            .iter()
            .map(|e| e.config_version.clone())
            .max()
            .unwrap_or_default();
        let key = format!("snapshot-{version}.json");
        let data = serde_json::to_vec(&experiments)?;

        self.object_store.put(&key, &data).await?;
        info!(key = %key, experiments = experiments.len(), "uploaded snapshot");

        let meta = SnapshotMeta {
            snapshot_version: version.clone(),
            path: key,
            created_at: Utc::now(),
        };
        let record = Record::keyed(version.to_string(), serde_json::to_vec(&meta)?);
        self.meta_log.append(record).await?;

        info!(snapshot_version = %meta.snapshot_version, "published snapshot metadata");
        Ok(Some(meta))
    }

    /// Regenerate snapshots on a fixed interval until `shutdown` fires.
    pub fn spawn(self, interval: Duration, shutdown: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!(interval = ?interval, "snapshot generator started");
            let mut ticker = tokio::time::interval(interval);

            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => {
                        info!("snapshot generator received shutdown signal");
                        break;
                    }
                    _ = ticker.tick() => {
                        if let Err(e) = self.run_once().await {
                            error!(error = %e, "snapshot generation failed");
                        }
                    }
                }
            }

            info!("snapshot generator stopped");
        })
    }
}
