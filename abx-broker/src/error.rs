//! Error types for broker operations.

/// Error type for broker operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The broker rejected or failed a publish.
    #[error("publish failed: {0}")]
    Publish(String),

    /// Creating or driving a consumer failed.
    #[error("consumer error: {0}")]
    Consumer(String),
}

/// Result type alias for broker operations.
pub type Result<T> = std::result::Result<T, Error>;
