//! The experiment aggregate and its invariants.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::rules::TargetingRule;
use crate::version::ConfigVersion;
use crate::BUCKET_COUNT;

/// Lifecycle state of an experiment.
///
/// Only ACTIVE experiments assign users; a past `end_time` makes an
/// experiment inactive regardless of status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExperimentStatus {
    Draft,
    Active,
    Paused,
    Finished,
}

impl ExperimentStatus {
    /// Terminal statuses never assign again; the cache drops entries that
    /// transition into one.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, ExperimentStatus::Finished)
    }
}

/// One named treatment with its inclusive bucket interval.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Variant {
    /// Name unique within the experiment (for example "control").
    pub name: String,
    /// Inclusive `[lo, hi]` interval over `[0, 999]`. Gaps between
    /// variants mean "no assignment" for buckets falling there.
    pub bucket_range: [u16; 2],
}

impl Variant {
    /// Whether `bucket` falls inside this variant's range.
    #[must_use]
    pub fn contains(&self, bucket: u64) -> bool {
        u64::from(self.bucket_range[0]) <= bucket && bucket <= u64::from(self.bucket_range[1])
    }
}

/// Manual allow/deny lists evaluated before targeting and bucketing.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OverrideLists {
    /// Users forced into a specific variant, keyed by variant name.
    /// Targeting and bucketing are skipped for them.
    #[serde(default)]
    pub force_include: BTreeMap<String, BTreeSet<String>>,

    /// Users the experiment never assigns. Wins over force_include.
    #[serde(default)]
    pub force_exclude: BTreeSet<String>,
}

impl OverrideLists {
    /// The forced variant for `user_id`, if any.
    #[must_use]
    pub fn forced_variant(&self, user_id: &str) -> Option<&str> {
        self.force_include
            .iter()
            .find(|(_, users)| users.contains(user_id))
            .map(|(variant, _)| variant.as_str())
    }
}

/// Full configuration of one A/B experiment.
///
/// This is the primary data contract: the repository persists it, the
/// outbox carries it, snapshots are arrays of it and the SDK cache stores
/// it verbatim.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Experiment {
    /// Stable unique identifier, immutable after creation.
    pub id: String,

    /// Mutual-exclusion domain; at most one experiment per layer assigns
    /// any given user.
    pub layer_id: String,

    /// Revision identifier, strictly increasing across updates.
    pub config_version: ConfigVersion,

    /// Wall-clock end of the experiment, if scheduled.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,

    /// Hash salt generated at creation, never mutated. Per-experiment
    /// salts keep rebucketing independent across experiments.
    pub salt: String,

    /// Lifecycle state.
    pub status: ExperimentStatus,

    /// All rules must match (logical AND) for a user to be bucketed.
    #[serde(default)]
    pub targeting_rules: Vec<TargetingRule>,

    /// Manual include/exclude lists.
    #[serde(default)]
    pub override_lists: OverrideLists,

    /// Treatments with pairwise-disjoint bucket ranges.
    #[serde(default)]
    pub variants: Vec<Variant>,
}

impl Experiment {
    /// Whether the experiment can assign users at `now`.
    #[must_use]
    pub fn is_active_at(&self, now: DateTime<Utc>) -> bool {
        if self.status != ExperimentStatus::Active {
            return false;
        }
        match self.end_time {
            Some(end) => end > now,
            None => true,
        }
    }

    /// Check the structural invariants the write path must enforce.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.id.is_empty() {
            return Err(ValidationError::MissingField("id"));
        }
        if self.layer_id.is_empty() {
            return Err(ValidationError::MissingField("layer_id"));
        }

        let mut seen_names = BTreeSet::new();
        for variant in &self.variants {
            if variant.name.is_empty() {
                return Err(ValidationError::MissingField("variant.name"));
            }
            if !seen_names.insert(variant.name.as_str()) {
                return Err(ValidationError::DuplicateVariant(variant.name.clone()));
            }
            let [lo, hi] = variant.bucket_range;
            if lo > hi || u64::from(hi) >= BUCKET_COUNT {
                return Err(ValidationError::BadBucketRange {
                    variant: variant.name.clone(),
                    lo,
                    hi,
                });
            }
        }

        // Pairwise disjointness over the sorted ranges.
        let mut ranges: Vec<[u16; 2]> = self.variants.iter().map(|v| v.bucket_range).collect();
        ranges.sort_unstable();
        for pair in ranges.windows(2) {
            if pair[1][0] <= pair[0][1] {
                return Err(ValidationError::OverlappingRanges {
                    first: pair[0],
                    second: pair[1],
                });
            }
        }

        Ok(())
    }
}

/// Structural violations rejected at the write path.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("required field is empty: {0}")]
    MissingField(&'static str),

    #[error("duplicate variant name: {0}")]
    DuplicateVariant(String),

    #[error("variant {variant} has invalid bucket range [{lo}, {hi}]")]
    BadBucketRange { variant: String, lo: u16, hi: u16 },

    #[error("bucket ranges {first:?} and {second:?} overlap")]
    OverlappingRanges { first: [u16; 2], second: [u16; 2] },
}
