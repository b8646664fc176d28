//! Storage for the abx platform.
//!
//! Two concerns live here:
//!
//! - [`ExperimentStore`] - SQLite-backed repository for experiments with a
//!   transactional outbox. Every mutation writes the experiment row and
//!   its outbox row in one transaction, which is the atomicity contract
//!   the outbox worker relies on.
//! - [`ObjectStore`] - interface to the snapshot bucket, with a
//!   local-directory implementation and an in-memory one for tests.

pub mod error;
pub mod object_store;
pub mod outbox;
pub mod repository;

pub use error::{ObjectStoreError, StoreError};
pub use object_store::{LocalDirObjectStore, MemoryObjectStore, ObjectStore};
pub use outbox::{OutboxEventType, OutboxRow};
pub use repository::ExperimentStore;

/// Result type alias for repository operations.
pub type Result<T> = std::result::Result<T, StoreError>;
