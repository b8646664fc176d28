//! The SDK facade.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use chrono::Utc;
use rand::Rng;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use abx_broker::{EventLog, Record};
use abx_types::{AssignmentEvent, AttrValue, ConfigVersion, Experiment};

use crate::bootstrap::load_snapshot_bytes;
use crate::cache::ExperimentCache;
use crate::config::SdkConfig;
use crate::decision::evaluate_experiment;
use crate::metrics::SdkMetrics;
use crate::tailer::spawn_delta_tailer;
use crate::telemetry::spawn_assignment_publisher;
use crate::Result;

/// Embedded A/B client.
///
/// Construction blocks until a valid configuration is loaded; afterwards
/// [`AbClient::decide`] is served entirely from memory.
pub struct AbClient {
    cache: Arc<ExperimentCache>,
    metrics: Arc<SdkMetrics>,
    /// Local debug overrides: experiment id to variant name.
    overrides: HashMap<String, String>,
    assignments: broadcast::Sender<AssignmentEvent>,
    shutdown: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

impl AbClient {
    /// Bootstrap a client and start its background tasks.
    ///
    /// Sleeps a random jitter first so a fleet restarting at once does
    /// not stampede the snapshot bucket. Fails when neither the bucket
    /// nor the local cache file yields a usable snapshot.
    pub async fn connect(
        config: SdkConfig,
        object_store: Arc<dyn abx_store::ObjectStore>,
        delta_log: Arc<dyn EventLog<Record>>,
        assignment_log: Arc<dyn EventLog<Record>>,
    ) -> Result<Self> {
        let jitter_ms = config.startup_jitter.as_millis() as u64;
        if jitter_ms > 0 {
            let jitter = std::time::Duration::from_millis(rand::thread_rng().gen_range(0..=jitter_ms));
            info!(jitter_ms = jitter.as_millis() as u64, "applying startup jitter");
            tokio::time::sleep(jitter).await;
        }

        let metrics = Arc::new(SdkMetrics::new()?);

        let overrides = match &config.overrides_file_path {
            Some(path) => match load_overrides(path) {
                Ok(overrides) => {
                    warn!(
                        count = overrides.len(),
                        "A/B client started with local overrides. THIS SHOULD NOT BE USED IN PRODUCTION."
                    );
                    overrides
                }
                Err(e) => {
                    warn!(error = %e, "could not load overrides file");
                    HashMap::new()
                }
            },
            None => HashMap::new(),
        };

        let cache = Arc::new(ExperimentCache::new(config.relevant_layer_ids.clone()));

        let bytes = load_snapshot_bytes(&config, object_store.as_ref()).await?;
        let experiments: Vec<Experiment> = serde_json::from_slice(&bytes)?;
        cache.populate_from_snapshot(experiments);
        metrics.set_config_version(&cache.config_version());

        let shutdown = CancellationToken::new();
        let tailer = spawn_delta_tailer(
            &config,
            delta_log,
            Arc::clone(&cache),
            Arc::clone(&metrics),
            shutdown.clone(),
        )
        .await?;
        let (assignments, publisher) = spawn_assignment_publisher(
            assignment_log,
            Arc::clone(&metrics),
            config.assignment_queue_capacity,
            shutdown.clone(),
        );

        info!(config_version = %cache.config_version(), "A/B client initialized");

        Ok(Self {
            cache,
            metrics,
            overrides,
            assignments,
            shutdown,
            tasks: vec![tailer, publisher],
        })
    }

    /// Decide which variants `user_id` is assigned to.
    ///
    /// Returns a map from experiment id to variant name. Within each
    /// layer the first experiment that assigns wins and the rest of the
    /// layer is skipped, which is how layer mutual exclusion is enforced.
    /// An empty user id yields an empty map.
    #[must_use]
    pub fn decide(
        &self,
        user_id: &str,
        attributes: &HashMap<String, AttrValue>,
    ) -> HashMap<String, String> {
        let mut assignments = HashMap::new();
        if user_id.is_empty() {
            return assignments;
        }

        let now = Utc::now();
        {
            let inner = self.cache.read();
            for experiments_in_layer in inner.experiments.values() {
                for exp in experiments_in_layer {
                    if let Some(variant) = evaluate_experiment(exp, user_id, attributes, now) {
                        self.metrics.record_decision(&exp.id, &variant);
                        self.track_assignment(user_id, &exp.id, &variant, attributes);
                        assignments.insert(exp.id.clone(), variant);
                        break;
                    }
                }
            }
        }

        // Debug overrides overwrite whatever was computed.
        for (experiment_id, variant_name) in &self.overrides {
            assignments.insert(experiment_id.clone(), variant_name.clone());
        }

        assignments
    }

    fn track_assignment(
        &self,
        user_id: &str,
        experiment_id: &str,
        variant_name: &str,
        attributes: &HashMap<String, AttrValue>,
    ) {
        let event = AssignmentEvent {
            user_id: user_id.to_string(),
            experiment_id: experiment_id.to_string(),
            variant_name: variant_name.to_string(),
            timestamp: Utc::now(),
            context: attributes.clone(),
        };
        // Queueing only; the publisher task does the I/O. A send error
        // means the publisher is gone, which only happens during
        // shutdown.
        if self.assignments.send(event).is_err() {
            self.metrics.record_error("assignment_publish_error");
        }
    }

    /// The highest config version currently applied.
    #[must_use]
    pub fn config_version(&self) -> ConfigVersion {
        self.cache.config_version()
    }

    /// The client's metrics registry, for scraping.
    #[must_use]
    pub fn metrics_registry(&self) -> &prometheus::Registry {
        self.metrics.registry()
    }

    /// Stop the delta tailer, flush queued telemetry and wait for both
    /// background tasks to finish.
    pub async fn shutdown(self) {
        info!("shutting down A/B client");
        self.shutdown.cancel();
        for task in self.tasks {
            if let Err(e) = task.await {
                warn!(error = %e, "background task panicked during shutdown");
            }
        }
    }
}

/// Load the debug overrides file: a JSON object mapping experiment id to
/// variant name.
fn load_overrides(path: &Path) -> Result<HashMap<String, String>> {
    let data = std::fs::read(path)?;
    Ok(serde_json::from_slice(&data)?)
}
