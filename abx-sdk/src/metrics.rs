//! Prometheus metrics maintained by the SDK.
//!
//! The metric names are contracts consumed by fleet dashboards; renaming
//! one is a breaking change.

use prometheus::{IntCounterVec, IntGauge, Opts, Registry};

use abx_types::ConfigVersion;

/// Metrics registry for one client instance.
pub struct SdkMetrics {
    registry: Registry,
    config_version_ts: IntGauge,
    decisions: IntCounterVec,
    errors: IntCounterVec,
}

impl SdkMetrics {
    /// Build and register all client metrics in a fresh registry.
    pub fn new() -> crate::Result<Self> {
        let registry = Registry::new();

        let config_version_ts = IntGauge::new(
            "ab_client_config_version_timestamp_ms",
            "Millisecond timestamp embedded in the config version currently applied",
        )?;
        registry.register(Box::new(config_version_ts.clone()))?;

        let decisions = IntCounterVec::new(
            Opts::new(
                "ab_client_decisions_total",
                "Decisions made, partitioned by experiment and variant",
            ),
            &["experiment_id", "variant_name"],
        )?;
        registry.register(Box::new(decisions.clone()))?;

        let errors = IntCounterVec::new(
            Opts::new(
                "ab_client_errors_total",
                "Errors encountered by the client, by type",
            ),
            &["type"],
        )?;
        registry.register(Box::new(errors.clone()))?;

        Ok(Self {
            registry,
            config_version_ts,
            decisions,
            errors,
        })
    }

    /// The registry holding this client's metrics, for scraping.
    #[must_use]
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Record one decision outcome.
    pub fn record_decision(&self, experiment_id: &str, variant_name: &str) {
        self.decisions
            .with_label_values(&[experiment_id, variant_name])
            .inc();
    }

    /// Count one error of the given type.
    pub fn record_error(&self, error_type: &str) {
        self.errors.with_label_values(&[error_type]).inc();
    }

    /// Count `n` errors of the given type at once.
    pub fn record_errors(&self, error_type: &str, n: u64) {
        self.errors.with_label_values(&[error_type]).inc_by(n);
    }

    /// Publish the timestamp embedded in the active config version.
    ///
    /// Unparseable versions leave the gauge untouched.
    pub fn set_config_version(&self, version: &ConfigVersion) {
        if let Some(ms) = version.timestamp_ms() {
            self.config_version_ts.set(ms as i64);
        }
    }
}
