//! Layer-indexed in-memory experiment cache.
//!
//! One reader-preferring lock guards the whole cache: decisions take it
//! shared, snapshot population and delta application take it exclusive.
//! The lock is never held across I/O; both feeds deserialize before
//! touching it.

use std::collections::{HashMap, HashSet};
use std::sync::{RwLock, RwLockReadGuard};

use tracing::{debug, info};

use abx_types::{ConfigVersion, DeltaEvent, Experiment};

/// What applying one delta did to the cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeltaOutcome {
    /// Upsert admitted; the cache version advanced to the event's.
    Applied(ConfigVersion),
    /// The event's version was not newer than the cache's. Dropped.
    Stale,
    /// Layer scoping is on and the experiment's layer is not relevant.
    Irrelevant,
    /// The experiment was removed (delete event or terminal status).
    Removed,
    /// A delete for an id the cache does not hold.
    Unknown,
}

pub(crate) struct CacheInner {
    /// Experiments grouped by layer. Iteration order within a layer is
    /// admission order; the decision engine depends on it being stable
    /// between reads.
    pub(crate) experiments: HashMap<String, Vec<Experiment>>,
    /// Highest config version ever admitted.
    pub(crate) config_version: ConfigVersion,
}

/// Shared experiment cache of one SDK client.
pub struct ExperimentCache {
    inner: RwLock<CacheInner>,
    /// Non-empty set enables layer scoping.
    relevant_layers: HashSet<String>,
}

impl ExperimentCache {
    /// Create an empty cache, optionally scoped to `relevant_layers`.
    #[must_use]
    pub fn new(relevant_layers: impl IntoIterator<Item = String>) -> Self {
        Self {
            inner: RwLock::new(CacheInner {
                experiments: HashMap::new(),
                config_version: ConfigVersion::default(),
            }),
            relevant_layers: relevant_layers.into_iter().collect(),
        }
    }

    fn is_relevant(&self, layer_id: &str) -> bool {
        self.relevant_layers.is_empty() || self.relevant_layers.contains(layer_id)
    }

    pub(crate) fn read(&self) -> RwLockReadGuard<'_, CacheInner> {
        self.inner.read().unwrap()
    }

    /// The highest config version admitted so far.
    #[must_use]
    pub fn config_version(&self) -> ConfigVersion {
        self.read().config_version.clone()
    }

    /// Number of cached experiments across all layers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.read().experiments.values().map(Vec::len).sum()
    }

    /// Whether the cache holds no experiments.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Replace the entire cache contents from a parsed snapshot.
    ///
    /// Scoped-out experiments are dropped; the cache version becomes the
    /// maximum among admitted entries.
    pub fn populate_from_snapshot(&self, experiments: Vec<Experiment>) {
        let mut admitted: HashMap<String, Vec<Experiment>> = HashMap::new();
        let mut max_version = ConfigVersion::default();
        let mut count = 0usize;

        for exp in experiments {
            if !self.is_relevant(&exp.layer_id) {
                continue;
            }
            if exp.config_version > max_version {
                max_version = exp.config_version.clone();
            }
            admitted.entry(exp.layer_id.clone()).or_default().push(exp);
            count += 1;
        }

        let layers = admitted.len();
        let mut inner = self.inner.write().unwrap();
        inner.experiments = admitted;
        inner.config_version = max_version;
        drop(inner);

        info!(experiments = count, layers, "populated cache from snapshot");
    }

    /// Apply one delta event.
    ///
    /// Upserts are admitted only when strictly newer than the cache
    /// version; the comparison happens before the version is advanced, so
    /// replayed history is a no-op. Deletes and terminal-status upserts
    /// remove the entry.
    pub fn apply_delta(&self, event: DeltaEvent) -> DeltaOutcome {
        match event {
            DeltaEvent::Delete { id } => {
                let mut inner = self.inner.write().unwrap();
                if remove_everywhere(&mut inner.experiments, &id) {
                    debug!(experiment_id = %id, "removed experiment on delete event");
                    DeltaOutcome::Removed
                } else {
                    DeltaOutcome::Unknown
                }
            }
            DeltaEvent::Upsert(exp) => {
                if !self.is_relevant(&exp.layer_id) {
                    return DeltaOutcome::Irrelevant;
                }

                let mut inner = self.inner.write().unwrap();
                // Compare against the pre-update version, then assign.
                if exp.config_version <= inner.config_version {
                    debug!(
                        experiment_id = %exp.id,
                        delta_version = %exp.config_version,
                        cache_version = %inner.config_version,
                        "dropping stale delta"
                    );
                    return DeltaOutcome::Stale;
                }

                let version = exp.config_version.clone();
                inner.config_version = version.clone();

                if exp.status.is_terminal() {
                    remove_everywhere(&mut inner.experiments, &exp.id);
                    debug!(experiment_id = %exp.id, "removed experiment on terminal status");
                    return DeltaOutcome::Removed;
                }

                // Replace in place when the experiment already sits in
                // this layer; its position decides layer priority and
                // must not change on an ordinary update.
                if let Some(layer) = inner.experiments.get_mut(&exp.layer_id) {
                    if let Some(slot) = layer.iter_mut().find(|e| e.id == exp.id) {
                        *slot = exp;
                        return DeltaOutcome::Applied(version);
                    }
                }

                // New to this layer: drop any copy left in a previous
                // layer, then append.
                remove_everywhere(&mut inner.experiments, &exp.id);
                inner
                    .experiments
                    .entry(exp.layer_id.clone())
                    .or_default()
                    .push(exp);

                DeltaOutcome::Applied(version)
            }
        }
    }
}

/// Remove `id` from whichever layer holds it. True if an entry was
/// removed.
fn remove_everywhere(experiments: &mut HashMap<String, Vec<Experiment>>, id: &str) -> bool {
    let mut removed = false;
    experiments.retain(|_, layer| {
        let before = layer.len();
        layer.retain(|e| e.id != id);
        removed |= layer.len() != before;
        !layer.is_empty()
    });
    removed
}

#[cfg(test)]
mod tests {
    use super::*;
    use abx_types::{ExperimentStatus, OverrideLists, Variant};

    fn experiment(id: &str, layer: &str, version: ConfigVersion) -> Experiment {
        Experiment {
            id: id.to_string(),
            layer_id: layer.to_string(),
            config_version: version,
            end_time: None,
            salt: "salt".to_string(),
            status: ExperimentStatus::Active,
            targeting_rules: Vec::new(),
            override_lists: OverrideLists::default(),
            variants: vec![Variant {
                name: "control".to_string(),
                bucket_range: [0, 999],
            }],
        }
    }

    #[test]
    fn populate_sets_version_to_max_admitted() {
        let cache = ExperimentCache::new([]);
        let v1 = ConfigVersion::generate();
        let v2 = ConfigVersion::generate();
        cache.populate_from_snapshot(vec![
            experiment("a", "l1", v2.clone()),
            experiment("b", "l2", v1),
        ]);

        assert_eq!(cache.config_version(), v2);
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn populate_applies_layer_scoping() {
        let cache = ExperimentCache::new(["l1".to_string()]);
        let v_in = ConfigVersion::generate();
        let v_out = ConfigVersion::generate(); // newer, but scoped out
        cache.populate_from_snapshot(vec![
            experiment("a", "l1", v_in.clone()),
            experiment("b", "l2", v_out),
        ]);

        assert_eq!(cache.len(), 1);
        // The version tracks admitted experiments only.
        assert_eq!(cache.config_version(), v_in);
    }

    #[test]
    fn stale_delta_is_noop() {
        let cache = ExperimentCache::new([]);
        let v0 = ConfigVersion::generate();
        let v1 = ConfigVersion::generate();
        cache.populate_from_snapshot(vec![experiment("a", "l1", v1.clone())]);

        let outcome = cache.apply_delta(DeltaEvent::Upsert(experiment("a", "l1", v0)));
        assert_eq!(outcome, DeltaOutcome::Stale);
        assert_eq!(cache.config_version(), v1);

        // Equal version is also stale.
        let outcome = cache.apply_delta(DeltaEvent::Upsert(experiment("a", "l1", v1.clone())));
        assert_eq!(outcome, DeltaOutcome::Stale);
        assert_eq!(cache.config_version(), v1);
    }

    #[test]
    fn newer_delta_replaces_and_advances_version() {
        let cache = ExperimentCache::new([]);
        let v1 = ConfigVersion::generate();
        cache.populate_from_snapshot(vec![experiment("a", "l1", v1)]);

        let v2 = ConfigVersion::generate();
        let mut updated = experiment("a", "l1", v2.clone());
        updated.variants[0].name = "treatment".to_string();

        let outcome = cache.apply_delta(DeltaEvent::Upsert(updated));
        assert_eq!(outcome, DeltaOutcome::Applied(v2.clone()));
        assert_eq!(cache.config_version(), v2);
        assert_eq!(cache.len(), 1);

        let inner = cache.read();
        assert_eq!(inner.experiments["l1"][0].variants[0].name, "treatment");
    }

    #[test]
    fn unknown_experiment_is_appended() {
        let cache = ExperimentCache::new([]);
        let v1 = ConfigVersion::generate();
        cache.populate_from_snapshot(vec![experiment("a", "l1", v1)]);

        let v2 = ConfigVersion::generate();
        let outcome = cache.apply_delta(DeltaEvent::Upsert(experiment("b", "l1", v2)));
        assert!(matches!(outcome, DeltaOutcome::Applied(_)));
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn scoped_out_delta_is_irrelevant() {
        let cache = ExperimentCache::new(["l1".to_string()]);
        let outcome = cache.apply_delta(DeltaEvent::Upsert(experiment(
            "x",
            "l2",
            ConfigVersion::generate(),
        )));
        assert_eq!(outcome, DeltaOutcome::Irrelevant);
        assert!(cache.is_empty());
    }

    #[test]
    fn delete_event_removes_entry() {
        let cache = ExperimentCache::new([]);
        cache.populate_from_snapshot(vec![experiment("a", "l1", ConfigVersion::generate())]);

        let outcome = cache.apply_delta(DeltaEvent::Delete {
            id: "a".to_string(),
        });
        assert_eq!(outcome, DeltaOutcome::Removed);
        assert!(cache.is_empty());

        let outcome = cache.apply_delta(DeltaEvent::Delete {
            id: "a".to_string(),
        });
        assert_eq!(outcome, DeltaOutcome::Unknown);
    }

    #[test]
    fn terminal_status_upsert_removes_entry() {
        let cache = ExperimentCache::new([]);
        cache.populate_from_snapshot(vec![experiment("a", "l1", ConfigVersion::generate())]);

        let v2 = ConfigVersion::generate();
        let mut finished = experiment("a", "l1", v2.clone());
        finished.status = ExperimentStatus::Finished;

        let outcome = cache.apply_delta(DeltaEvent::Upsert(finished));
        assert_eq!(outcome, DeltaOutcome::Removed);
        assert!(cache.is_empty());
        assert_eq!(cache.config_version(), v2);
    }

    #[test]
    fn same_layer_update_keeps_position() {
        let cache = ExperimentCache::new([]);
        let v1 = ConfigVersion::generate();
        let v2 = ConfigVersion::generate();
        cache.populate_from_snapshot(vec![
            experiment("a", "l1", v1),
            experiment("b", "l1", v2),
        ]);

        // Touch an unrelated field of "a"; it must stay first in the
        // layer so it keeps winning the layer scan.
        let v3 = ConfigVersion::generate();
        let mut updated = experiment("a", "l1", v3.clone());
        updated.end_time = Some(chrono::Utc::now() + chrono::Duration::hours(1));

        let outcome = cache.apply_delta(DeltaEvent::Upsert(updated));
        assert_eq!(outcome, DeltaOutcome::Applied(v3.clone()));

        let inner = cache.read();
        let ids: Vec<&str> = inner.experiments["l1"]
            .iter()
            .map(|e| e.id.as_str())
            .collect();
        assert_eq!(ids, vec!["a", "b"]);
        assert!(inner.experiments["l1"][0].end_time.is_some());
        assert_eq!(inner.experiments["l1"][0].config_version, v3);
    }

    #[test]
    fn layer_move_does_not_duplicate() {
        let cache = ExperimentCache::new([]);
        cache.populate_from_snapshot(vec![experiment("a", "l1", ConfigVersion::generate())]);

        let moved = experiment("a", "l2", ConfigVersion::generate());
        cache.apply_delta(DeltaEvent::Upsert(moved));

        assert_eq!(cache.len(), 1);
        let inner = cache.read();
        assert!(!inner.experiments.contains_key("l1"));
        assert_eq!(inner.experiments["l2"][0].id, "a");
    }

    #[test]
    fn version_is_monotonic_over_any_delta_sequence() {
        let cache = ExperimentCache::new([]);
        let versions: Vec<ConfigVersion> =
            (0..5).map(|_| ConfigVersion::generate()).collect();

        // Apply out of order; the cache version must never move backwards.
        for idx in [2usize, 0, 4, 1, 3] {
            let before = cache.config_version();
            cache.apply_delta(DeltaEvent::Upsert(experiment(
                &format!("e-{idx}"),
                "l1",
                versions[idx].clone(),
            )));
            assert!(cache.config_version() >= before);
        }

        assert_eq!(cache.config_version(), versions[4].clone());
    }
}
