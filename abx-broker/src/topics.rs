//! Topic names shared by producers and consumers.

/// Experiment change events, keyed by experiment id.
pub const DELTAS: &str = "ab_deltas";

/// Snapshot metadata records, keyed by snapshot version.
pub const SNAPSHOTS_META: &str = "ab_snapshots_meta";

/// Assignment telemetry, keyed by user id.
pub const ASSIGNMENT_EVENTS: &str = "ab_assignment_events";
