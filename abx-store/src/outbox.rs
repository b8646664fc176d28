//! Outbox row types.
//!
//! The outbox table is a queue, not history: rows are born PENDING, move
//! to LOCKED while a worker holds them, and are deleted after a
//! successful publish.

use chrono::{DateTime, Utc};

/// Kind of change an outbox row describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutboxEventType {
    /// Payload is the full serialized experiment.
    Upsert,
    /// Payload is `{"id": ...}`.
    Delete,
}

impl OutboxEventType {
    pub(crate) fn as_str(self) -> &'static str {
        match self {
            OutboxEventType::Upsert => "UPSERT",
            OutboxEventType::Delete => "DELETE",
        }
    }

    pub(crate) fn parse(s: &str) -> Option<Self> {
        match s {
            "UPSERT" => Some(OutboxEventType::Upsert),
            "DELETE" => Some(OutboxEventType::Delete),
            _ => None,
        }
    }
}

/// One claimed outbox row, ready to publish.
#[derive(Debug, Clone)]
pub struct OutboxRow {
    pub event_id: String,
    /// Experiment id; the delta-topic partition key.
    pub aggregate_id: String,
    pub event_type: OutboxEventType,
    /// Serialized payload, published verbatim.
    pub payload: String,
    pub created_at: DateTime<Utc>,
}
