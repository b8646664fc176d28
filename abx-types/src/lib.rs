//! Shared data model for the abx experimentation platform.
//!
//! Every process in the system (the admin service, the outbox worker, the
//! snapshot generator and the embedded client SDK) exchanges the types in
//! this crate as JSON. The [`Experiment`] struct is the primary data
//! contract; everything else orbits it.
//!
//! # Key Types
//!
//! - [`Experiment`] - Full configuration of one A/B experiment
//! - [`ConfigVersion`] - Time-ordered revision identifier (UUIDv7)
//! - [`DeltaEvent`] - Wire shape of a single change on the delta topic
//! - [`AssignmentEvent`] - Telemetry record emitted on every assignment

pub mod events;
pub mod experiment;
pub mod rules;
pub mod version;

pub use events::{AssignmentEvent, DeltaEvent, SnapshotMeta};
pub use experiment::{
    Experiment, ExperimentStatus, OverrideLists, ValidationError, Variant,
};
pub use rules::{AttrValue, Operator, TargetingRule};
pub use version::ConfigVersion;

/// Number of hash buckets a user can land in. Variant ranges are inclusive
/// intervals over `[0, BUCKET_COUNT - 1]`.
pub const BUCKET_COUNT: u64 = 1000;
