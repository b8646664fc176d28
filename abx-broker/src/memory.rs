//! Partitioned in-memory EventLog.
//!
//! Backs tests and single-process deployments without a broker server
//! while keeping the semantics the platform relies on: key-based partition
//! routing, partition-local offsets, durable consumer-group positions and
//! ordering within (and only within) a partition.

use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{Notify, RwLock};

use crate::error::Result;
use crate::traits::{EventBatch, EventConsumer, EventLog, Offset, Partitionable, SeekPosition};

/// Number of partitions per topic.
const PARTITION_COUNT: usize = 8;

struct PartitionState<E> {
    events: Vec<E>,
}

impl<E> Default for PartitionState<E> {
    fn default() -> Self {
        Self { events: Vec::new() }
    }
}

/// Shared state between the log and its consumers.
struct SharedState<E> {
    partitions: RwLock<[PartitionState<E>; PARTITION_COUNT]>,
    consumer_offsets: RwLock<HashMap<String, [Offset; PARTITION_COUNT]>>,
    notify: Notify,
}

/// In-memory partitioned implementation of [`EventLog`].
///
/// Events are routed to partitions by hashing their partition key; each
/// partition has its own offset sequence, and consumers track one offset
/// per partition.
pub struct PartitionedEventLog<E> {
    shared: Arc<SharedState<E>>,
}

impl<E> PartitionedEventLog<E>
where
    E: Clone + Send + Sync + Partitionable + 'static,
{
    /// Create a new empty log.
    #[must_use]
    pub fn new() -> Self {
        Self {
            shared: Arc::new(SharedState {
                partitions: RwLock::new(std::array::from_fn(|_| PartitionState::default())),
                consumer_offsets: RwLock::new(HashMap::new()),
                notify: Notify::new(),
            }),
        }
    }

    fn partition_for_key(key: Option<&str>) -> usize {
        match key {
            Some(k) => {
                let mut hasher = DefaultHasher::new();
                k.hash(&mut hasher);
                (hasher.finish() as usize) % PARTITION_COUNT
            }
            None => 0,
        }
    }

    /// Total event count across all partitions.
    pub async fn total_count(&self) -> usize {
        let partitions = self.shared.partitions.read().await;
        partitions.iter().map(|p| p.events.len()).sum()
    }
}

impl<E> Default for PartitionedEventLog<E>
where
    E: Clone + Send + Sync + Partitionable + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<E> EventLog<E> for PartitionedEventLog<E>
where
    E: Clone + Send + Sync + Partitionable + 'static,
{
    async fn append(&self, event: E) -> Result<Offset> {
        let partition_id = Self::partition_for_key(event.partition_key());
        let mut partitions = self.shared.partitions.write().await;
        let partition = &mut partitions[partition_id];

        let offset = partition.events.len() as Offset;
        partition.events.push(event);
        drop(partitions);

        self.shared.notify.notify_waiters();
        Ok(offset)
    }

    async fn consumer(&self, group: &str) -> Result<Box<dyn EventConsumer<E>>> {
        let offsets = {
            let consumer_offsets = self.shared.consumer_offsets.read().await;
            consumer_offsets
                .get(group)
                .copied()
                .unwrap_or([0; PARTITION_COUNT])
        };

        Ok(Box::new(PartitionedConsumer {
            group: group.to_string(),
            shared: Arc::clone(&self.shared),
            current_offsets: offsets,
        }))
    }
}

struct PartitionedConsumer<E> {
    group: String,
    shared: Arc<SharedState<E>>,
    current_offsets: [Offset; PARTITION_COUNT],
}

/// Collect available events in partition order, each partition's events
/// in append order. Advances the consumer's offsets past what it took.
async fn drain_available<E>(
    shared: &SharedState<E>,
    current_offsets: &mut [Offset; PARTITION_COUNT],
    max_count: usize,
) -> Vec<E>
where
    E: Clone + Send + Sync + 'static,
{
    let partitions = shared.partitions.read().await;
    let mut events = Vec::new();

    for (partition_id, partition) in partitions.iter().enumerate() {
        if events.len() >= max_count {
            break;
        }
        let start = current_offsets[partition_id] as usize;
        let end = std::cmp::min(start + (max_count - events.len()), partition.events.len());
        if end > start {
            events.extend(partition.events[start..end].iter().cloned());
            current_offsets[partition_id] = end as Offset;
        }
    }

    events
}

#[async_trait]
impl<E> EventConsumer<E> for PartitionedConsumer<E>
where
    E: Clone + Send + Sync + 'static,
{
    async fn poll(&mut self, max_count: usize, timeout: Duration) -> Result<EventBatch<E>> {
        let shared = Arc::clone(&self.shared);

        // Register for wakeup before the availability check so an append
        // between the check and the wait is not missed.
        let notified = shared.notify.notified();
        tokio::pin!(notified);
        notified.as_mut().enable();

        let events = drain_available(&shared, &mut self.current_offsets, max_count).await;
        if !events.is_empty() {
            return Ok(EventBatch::new(events));
        }

        tokio::select! {
            _ = &mut notified => {}
            _ = tokio::time::sleep(timeout) => return Ok(EventBatch::empty()),
        }

        Ok(EventBatch::new(
            drain_available(&shared, &mut self.current_offsets, max_count).await,
        ))
    }

    async fn commit(&mut self) -> Result<()> {
        let mut offsets = self.shared.consumer_offsets.write().await;
        offsets.insert(self.group.clone(), self.current_offsets);
        Ok(())
    }

    async fn seek(&mut self, position: SeekPosition) -> Result<()> {
        match position {
            SeekPosition::Beginning => {
                self.current_offsets = [0; PARTITION_COUNT];
            }
            SeekPosition::End => {
                let partitions = self.shared.partitions.read().await;
                for (i, partition) in partitions.iter().enumerate() {
                    self.current_offsets[i] = partition.events.len() as Offset;
                }
            }
        }
        Ok(())
    }

    fn group(&self) -> &str {
        &self.group
    }
}
