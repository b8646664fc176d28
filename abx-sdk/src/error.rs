//! Error types for the client SDK.

use thiserror::Error;

/// Error type for SDK operations.
///
/// Only construction can fail from the host's point of view; once the
/// client exists, decisions are served from memory and background errors
/// are retried and counted instead of surfaced.
#[derive(Debug, Error)]
pub enum Error {
    /// Neither the snapshot bucket nor the local cache file yielded a
    /// usable configuration.
    #[error("bootstrap failed: {0}")]
    Bootstrap(String),

    #[error("object store error: {0}")]
    ObjectStore(#[from] abx_store::ObjectStoreError),

    #[error("broker error: {0}")]
    Broker(#[from] abx_broker::Error),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("metrics registration error: {0}")]
    Metrics(#[from] prometheus::Error),
}

/// Result type alias for SDK operations.
pub type Result<T> = std::result::Result<T, Error>;
