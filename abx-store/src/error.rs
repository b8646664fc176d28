//! Error types for storage operations.

use thiserror::Error;

/// Errors from the experiment repository.
#[derive(Debug, Error)]
pub enum StoreError {
    /// A unique constraint was violated (duplicate experiment id).
    #[error("experiment already exists: {0}")]
    Conflict(String),

    /// Update or delete targeted an id that does not exist.
    #[error("experiment not found: {0}")]
    NotFound(String),

    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

/// Errors from the object store.
#[derive(Debug, Error)]
pub enum ObjectStoreError {
    #[error("object not found: {0}")]
    NotFound(String),

    #[error("object store I/O error: {0}")]
    Io(#[from] std::io::Error),
}
