//! The keyed byte record every platform topic carries.

use serde::{Deserialize, Serialize};

use crate::traits::Partitionable;

/// A keyed, opaque payload.
///
/// Payloads are JSON on every platform topic, but the broker does not
/// interpret them; deserialization failures are the consumer's concern so
/// a malformed message can be skipped without blocking the partition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    /// Partition key. All records with the same key stay ordered.
    pub key: Option<String>,
    /// Serialized payload bytes.
    pub payload: Vec<u8>,
}

impl Record {
    /// Build a keyed record.
    #[must_use]
    pub fn keyed(key: impl Into<String>, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            key: Some(key.into()),
            payload: payload.into(),
        }
    }
}

impl Partitionable for Record {
    fn partition_key(&self) -> Option<&str> {
        self.key.as_deref()
    }
}
