//! Broker abstraction for the abx platform.
//!
//! The platform treats the message broker as an interface: producers
//! append keyed records to a topic, consumers poll them in consumer groups
//! with independent offset tracking. Ordering is guaranteed per partition
//! only, and records with the same partition key always land on the same
//! partition.
//!
//! # Key Types
//!
//! - [`EventLog`] - Trait for appending events and creating consumers
//! - [`EventConsumer`] - Trait for polling events with offset tracking
//! - [`PartitionedEventLog`] - In-memory partitioned implementation
//! - [`Record`] - Keyed byte payload, the unit every platform topic carries

pub mod error;
pub mod memory;
pub mod record;
pub mod topics;
pub mod traits;

pub use error::{Error, Result};
pub use memory::PartitionedEventLog;
pub use record::Record;
pub use traits::{EventBatch, EventConsumer, EventLog, Offset, Partitionable, SeekPosition};
