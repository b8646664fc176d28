//! Payload types carried on the platform topics.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::experiment::Experiment;
use crate::rules::AttrValue;
use crate::version::ConfigVersion;

/// One change event on the delta topic.
///
/// An upsert carries the full experiment; a delete carries only the id.
/// The two are distinguished structurally: a bare `{"id": ...}` object is
/// not a valid [`Experiment`], so deserialization falls through to the
/// delete shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DeltaEvent {
    Upsert(Experiment),
    Delete { id: String },
}

impl DeltaEvent {
    /// The aggregate (experiment) id this event belongs to. Used as the
    /// partition key so all events of one experiment stay ordered.
    #[must_use]
    pub fn aggregate_id(&self) -> &str {
        match self {
            DeltaEvent::Upsert(exp) => &exp.id,
            DeltaEvent::Delete { id } => id,
        }
    }
}

/// Metadata record published after a snapshot upload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotMeta {
    /// Highest config version contained in the snapshot.
    pub snapshot_version: ConfigVersion,
    /// Object key the snapshot was uploaded under.
    pub path: String,
    /// When the snapshot was generated.
    pub created_at: DateTime<Utc>,
}

/// Telemetry record emitted for every positive assignment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssignmentEvent {
    pub user_id: String,
    pub experiment_id: String,
    pub variant_name: String,
    pub timestamp: DateTime<Utc>,
    /// The attributes the decision was made with.
    pub context: HashMap<String, AttrValue>,
}
