//! Core traits for event log operations.

use std::time::Duration;

use async_trait::async_trait;

/// Partition-local offset into an event stream.
pub type Offset = u64;

/// Position to seek to when starting a consumer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeekPosition {
    /// Start from the beginning of every partition.
    Beginning,
    /// Start from the end (new events only).
    End,
}

/// Types that can route themselves to a partition.
///
/// Events with the same key are stored on the same partition and are
/// therefore consumed in append order relative to each other. Events with
/// different keys have no ordering relationship.
pub trait Partitionable {
    /// The partition key, or `None` to land on the default partition.
    fn partition_key(&self) -> Option<&str>;
}

/// A batch of events returned from polling.
///
/// Events appear in partition order, and within each partition in append
/// order. No cross-partition ordering is implied.
#[derive(Debug)]
pub struct EventBatch<E> {
    events: Vec<E>,
}

impl<E> EventBatch<E> {
    /// Wrap a list of polled events.
    #[must_use]
    pub fn new(events: Vec<E>) -> Self {
        Self { events }
    }

    /// A batch with no events.
    #[must_use]
    pub fn empty() -> Self {
        Self { events: Vec::new() }
    }

    /// Number of events in the batch.
    #[must_use]
    pub fn len(&self) -> usize {
        self.events.len()
    }

    /// Whether the batch holds no events.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

impl<E> IntoIterator for EventBatch<E> {
    type Item = E;
    type IntoIter = std::vec::IntoIter<E>;

    fn into_iter(self) -> Self::IntoIter {
        self.events.into_iter()
    }
}

/// Trait for appending events and creating consumers.
#[async_trait]
pub trait EventLog<E>: Send + Sync {
    /// Append an event, routed by its partition key.
    async fn append(&self, event: E) -> crate::Result<Offset>;

    /// Create a consumer in `group`, resuming from the group's committed
    /// offsets (the beginning for a new group).
    async fn consumer(&self, group: &str) -> crate::Result<Box<dyn EventConsumer<E>>>;
}

/// Trait for polling events with offset tracking.
#[async_trait]
pub trait EventConsumer<E>: Send + Sync {
    /// Poll for up to `max_count` new events, waiting at most `timeout`
    /// when none are immediately available.
    async fn poll(&mut self, max_count: usize, timeout: Duration) -> crate::Result<EventBatch<E>>;

    /// Commit everything polled so far for this consumer's group.
    async fn commit(&mut self) -> crate::Result<()>;

    /// Move the poll position.
    async fn seek(&mut self, position: SeekPosition) -> crate::Result<()>;

    /// The consumer group this consumer tracks offsets for.
    fn group(&self) -> &str;
}
