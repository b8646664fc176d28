//! Background delta tailer.
//!
//! One task per client tails the delta topic and feeds the cache. The
//! task owns the broker consumer; the cache lock is only taken after a
//! message is fully deserialized.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use abx_broker::{EventConsumer, EventLog, Record, SeekPosition};
use abx_types::DeltaEvent;

use crate::cache::{DeltaOutcome, ExperimentCache};
use crate::config::SdkConfig;
use crate::metrics::SdkMetrics;
use crate::Result;

/// Spawn the delta tailer task.
///
/// The consumer starts at the end of the topic: history is covered by the
/// snapshot the client bootstrapped from, and the version check drops
/// anything older that gets replayed anyway. The task runs until the
/// token is cancelled.
pub(crate) async fn spawn_delta_tailer(
    config: &SdkConfig,
    delta_log: Arc<dyn EventLog<Record>>,
    cache: Arc<ExperimentCache>,
    metrics: Arc<SdkMetrics>,
    shutdown: CancellationToken,
) -> Result<JoinHandle<()>> {
    let mut consumer = delta_log.consumer(&config.group_id).await?;
    consumer.seek(SeekPosition::End).await?;

    let group = config.group_id.clone();
    let batch_size = config.poll_batch_size;
    let poll_timeout = config.poll_timeout;

    let handle = tokio::spawn(async move {
        info!(group = %group, "delta tailer started");

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!(group = %group, "delta tailer received shutdown signal");
                    break;
                }
                result = consumer.poll(batch_size, poll_timeout) => {
                    match result {
                        Ok(batch) => {
                            if batch.is_empty() {
                                continue;
                            }

                            debug!(group = %group, count = batch.len(), "applying delta batch");
                            for record in batch {
                                apply_record(&cache, &metrics, &record);
                            }

                            // Commit even if some messages were malformed;
                            // re-reading them would block the partition
                            // without ever succeeding.
                            if let Err(e) = consumer.commit().await {
                                error!(group = %group, error = %e, "failed to commit offsets");
                            }
                        }
                        Err(e) => {
                            error!(group = %group, error = %e, "delta poll failed");
                            metrics.record_error("delta_poll_error");
                            tokio::time::sleep(Duration::from_secs(1)).await;
                        }
                    }
                }
            }
        }

        info!(group = %group, "delta tailer stopped");
    });

    Ok(handle)
}

fn apply_record(cache: &ExperimentCache, metrics: &SdkMetrics, record: &Record) {
    let event: DeltaEvent = match serde_json::from_slice(&record.payload) {
        Ok(event) => event,
        Err(e) => {
            error!(error = %e, "failed to decode delta payload, skipping message");
            metrics.record_error("delta_decode_error");
            return;
        }
    };

    match cache.apply_delta(event) {
        DeltaOutcome::Applied(version) => {
            metrics.set_config_version(&version);
            info!(config_version = %version, "applied delta");
        }
        DeltaOutcome::Removed => {
            metrics.set_config_version(&cache.config_version());
        }
        DeltaOutcome::Stale | DeltaOutcome::Irrelevant | DeltaOutcome::Unknown => {}
    }
}
