//! The outbox worker.
//!
//! Drains PENDING outbox rows on a fixed tick and publishes them to the
//! delta topic, keyed by aggregate id so every experiment's events stay
//! on one partition in write order. Rows are claimed (PENDING to LOCKED)
//! before publishing and deleted only after the broker accepted them; a
//! failed publish releases the row for the next tick. Delivery is
//! at-least-once and consumers are idempotent by config version.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use abx_broker::{EventLog, Record};
use abx_store::ExperimentStore;

use super::WorkerError;

const DEFAULT_TICK: Duration = Duration::from_secs(2);
const DEFAULT_BATCH_SIZE: usize = 10;

/// Periodically publishes outbox rows to the delta topic.
pub struct OutboxWorker {
    store: Arc<ExperimentStore>,
    delta_log: Arc<dyn EventLog<Record>>,
    tick: Duration,
    batch_size: usize,
}

impl OutboxWorker {
    /// Create a worker with the default tick (2s) and batch size (10).
    pub fn new(store: Arc<ExperimentStore>, delta_log: Arc<dyn EventLog<Record>>) -> Self {
        Self {
            store,
            delta_log,
            tick: DEFAULT_TICK,
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }

    /// Set the drain interval.
    #[must_use]
    pub fn with_tick(mut self, tick: Duration) -> Self {
        self.tick = tick;
        self
    }

    /// Set the per-tick batch limit.
    #[must_use]
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    /// Drain one batch. Returns how many rows were published and removed.
    pub async fn run_once(&self) -> Result<usize, WorkerError> {
        let rows = self.store.claim_pending(self.batch_size)?;
        if rows.is_empty() {
            return Ok(0);
        }
        debug!(count = rows.len(), "claimed outbox batch");

        let mut published = Vec::new();
        let mut failed = Vec::new();

        for row in rows {
            let record = Record::keyed(row.aggregate_id.clone(), row.payload.clone().into_bytes());
            match self.delta_log.append(record).await {
                Ok(_) => published.push(row.event_id),
                Err(e) => {
                    error!(
                        event_id = %row.event_id,
                        aggregate_id = %row.aggregate_id,
                        error = %e,
                        "failed to publish outbox event, releasing for retry"
                    );
                    failed.push(row.event_id);
                }
            }
        }

        let count = published.len();
        if !published.is_empty() {
            self.store.delete_published(&published)?;
        }
        if !failed.is_empty() {
            self.store.release(&failed)?;
        }

        if count > 0 {
            debug!(published = count, "outbox batch completed");
        }
        Ok(count)
    }

    /// Run the drain loop until `shutdown` fires.
    pub fn spawn(self, shutdown: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!(tick = ?self.tick, batch_size = self.batch_size, "outbox worker started");
            let mut interval = tokio::time::interval(self.tick);

            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => {
                        info!("outbox worker received shutdown signal");
                        break;
                    }
                    _ = interval.tick() => {
                        if let Err(e) = self.run_once().await {
                            error!(error = %e, "outbox tick failed");
                        }
                    }
                }
            }

            info!("outbox worker stopped");
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use abx_broker::{EventConsumer, PartitionedEventLog, SeekPosition};
    use abx_types::{
        ConfigVersion, DeltaEvent, Experiment, ExperimentStatus, OverrideLists, Variant,
    };
    use async_trait::async_trait;

    fn experiment(id: &str) -> Experiment {
        Experiment {
            id: id.to_string(),
            layer_id: "l1".to_string(),
            config_version: ConfigVersion::generate(),
            end_time: None,
            salt: "salt".to_string(),
            status: ExperimentStatus::Active,
            targeting_rules: Vec::new(),
            override_lists: OverrideLists::default(),
            variants: vec![Variant {
                name: "control".to_string(),
                bucket_range: [0, 999],
            }],
        }
    }

    /// Broker double whose appends always fail.
    struct BrokenLog;

    #[async_trait]
    impl EventLog<Record> for BrokenLog {
        async fn append(&self, _event: Record) -> abx_broker::Result<u64> {
            Err(abx_broker::Error::Publish("broker down".to_string()))
        }

        async fn consumer(
            &self,
            _group: &str,
        ) -> abx_broker::Result<Box<dyn EventConsumer<Record>>> {
            Err(abx_broker::Error::Consumer("broker down".to_string()))
        }
    }

    #[tokio::test]
    async fn publishes_upsert_keyed_by_aggregate_and_empties_outbox() {
        let store = Arc::new(ExperimentStore::open_in_memory().unwrap());
        let log = Arc::new(PartitionedEventLog::new());
        let exp = experiment("exp-1");
        store.create(&exp).unwrap();

        let worker = OutboxWorker::new(store.clone(), log.clone());
        assert_eq!(worker.run_once().await.unwrap(), 1);
        assert_eq!(store.pending_count().unwrap(), 0);

        let mut consumer = log.consumer("sink").await.unwrap();
        consumer.seek(SeekPosition::Beginning).await.unwrap();
        let batch = consumer
            .poll(10, Duration::from_millis(50))
            .await
            .unwrap();
        let records: Vec<Record> = batch.into_iter().collect();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].key.as_deref(), Some("exp-1"));

        let event: DeltaEvent = serde_json::from_slice(&records[0].payload).unwrap();
        assert_eq!(event, DeltaEvent::Upsert(exp));
    }

    #[tokio::test]
    async fn publish_failure_releases_rows_for_retry() {
        let store = Arc::new(ExperimentStore::open_in_memory().unwrap());
        store.create(&experiment("exp-1")).unwrap();

        let broken = OutboxWorker::new(store.clone(), Arc::new(BrokenLog));
        assert_eq!(broken.run_once().await.unwrap(), 0);
        // Row is PENDING again, not lost and not LOCKED forever.
        assert_eq!(store.pending_count().unwrap(), 1);

        // A healthy tick delivers it: at-least-once.
        let log = Arc::new(PartitionedEventLog::new());
        let healthy = OutboxWorker::new(store.clone(), log.clone());
        assert_eq!(healthy.run_once().await.unwrap(), 1);
        assert_eq!(log.total_count().await, 1);
        assert_eq!(store.pending_count().unwrap(), 0);
    }

    #[tokio::test]
    async fn drains_in_created_order_per_aggregate() {
        let store = Arc::new(ExperimentStore::open_in_memory().unwrap());
        let log = Arc::new(PartitionedEventLog::new());

        let mut exp = experiment("exp-1");
        store.create(&exp).unwrap();
        exp.config_version = ConfigVersion::generate();
        exp.status = ExperimentStatus::Paused;
        store.update(&exp).unwrap();
        store.delete("exp-1").unwrap();

        let worker = OutboxWorker::new(store.clone(), log.clone()).with_batch_size(10);
        assert_eq!(worker.run_once().await.unwrap(), 3);

        let mut consumer = log.consumer("sink").await.unwrap();
        let batch = consumer
            .poll(10, Duration::from_millis(50))
            .await
            .unwrap();
        let events: Vec<DeltaEvent> = batch
            .into_iter()
            .map(|r| serde_json::from_slice(&r.payload).unwrap())
            .collect();

        assert_eq!(events.len(), 3);
        assert!(matches!(&events[0], DeltaEvent::Upsert(e) if e.status == ExperimentStatus::Active));
        assert!(matches!(&events[1], DeltaEvent::Upsert(e) if e.status == ExperimentStatus::Paused));
        assert!(matches!(&events[2], DeltaEvent::Delete { id } if id == "exp-1"));
    }

    #[tokio::test]
    async fn spawned_worker_drains_on_ticks() {
        let store = Arc::new(ExperimentStore::open_in_memory().unwrap());
        let log = Arc::new(PartitionedEventLog::new());
        store.create(&experiment("exp-1")).unwrap();

        let shutdown = CancellationToken::new();
        let handle = OutboxWorker::new(store.clone(), log.clone())
            .with_tick(Duration::from_millis(20))
            .spawn(shutdown.clone());

        tokio::time::timeout(Duration::from_secs(2), async {
            while store.pending_count().unwrap() != 0 {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("worker should drain the outbox");

        shutdown.cancel();
        handle.await.unwrap();
        assert_eq!(log.total_count().await, 1);
    }
}
