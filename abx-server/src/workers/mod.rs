//! Background workers: outbox drain and snapshot generation.
//!
//! Both follow the same shape: a `run_once` that does one unit of work
//! and a `spawn` that ticks it until the cancellation token fires. Errors
//! inside a tick are logged and counted on the next tick's retry; they
//! never kill the task.

pub mod outbox;
pub mod snapshot;

pub use outbox::OutboxWorker;
pub use snapshot::SnapshotGenerator;

/// Errors from one worker tick.
#[derive(Debug, thiserror::Error)]
pub enum WorkerError {
    #[error("store error: {0}")]
    Store(#[from] abx_store::StoreError),

    #[error("broker error: {0}")]
    Broker(#[from] abx_broker::Error),

    #[error("object store error: {0}")]
    ObjectStore(#[from] abx_store::ObjectStoreError),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}
