//! Configuration for the client SDK.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Construction-time configuration for [`crate::AbClient`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SdkConfig {
    /// Layer ids this client instance cares about. Empty means all
    /// layers; a non-empty list drops every experiment outside it, which
    /// bounds cache memory for hosts that only run a few surfaces.
    #[serde(default)]
    pub relevant_layer_ids: Vec<String>,

    /// Consumer group id for the delta topic. Must be unique per client
    /// instance so each instance sees the whole stream.
    #[serde(default = "default_group_id")]
    pub group_id: String,

    /// Where to mirror the last good snapshot on disk. `None` disables
    /// the local fallback.
    #[serde(default)]
    pub local_cache_path: Option<PathBuf>,

    /// Maximum age of the local cache file before it is considered
    /// unusable for bootstrap.
    #[serde(default = "default_local_cache_ttl", with = "humantime_serde")]
    pub local_cache_ttl: Duration,

    /// Optional debug overrides file mapping experiment id to variant
    /// name. Loading it logs a prominent warning.
    #[serde(default)]
    pub overrides_file_path: Option<PathBuf>,

    /// Upper bound of the random sleep before bootstrap, spreading
    /// restarts of a large fleet over time.
    #[serde(default = "default_startup_jitter", with = "humantime_serde")]
    pub startup_jitter: Duration,

    /// Maximum deltas fetched per poll.
    #[serde(default = "default_poll_batch_size")]
    pub poll_batch_size: usize,

    /// How long one poll waits for new deltas.
    #[serde(default = "default_poll_timeout", with = "humantime_serde")]
    pub poll_timeout: Duration,

    /// Capacity of the assignment-event queue between the decision path
    /// and the telemetry publisher. On overflow the oldest events are
    /// dropped and counted.
    #[serde(default = "default_assignment_queue_capacity")]
    pub assignment_queue_capacity: usize,
}

fn default_group_id() -> String {
    "abx-sdk".to_string()
}

fn default_local_cache_ttl() -> Duration {
    Duration::from_secs(15 * 60)
}

fn default_startup_jitter() -> Duration {
    Duration::from_millis(1000)
}

fn default_poll_batch_size() -> usize {
    100
}

fn default_poll_timeout() -> Duration {
    Duration::from_secs(1)
}

fn default_assignment_queue_capacity() -> usize {
    1024
}

impl Default for SdkConfig {
    fn default() -> Self {
        Self {
            relevant_layer_ids: Vec::new(),
            group_id: default_group_id(),
            local_cache_path: None,
            local_cache_ttl: default_local_cache_ttl(),
            overrides_file_path: None,
            startup_jitter: default_startup_jitter(),
            poll_batch_size: default_poll_batch_size(),
            poll_timeout: default_poll_timeout(),
            assignment_queue_capacity: default_assignment_queue_capacity(),
        }
    }
}

impl SdkConfig {
    /// Restrict the cache to the given layers.
    #[must_use]
    pub fn with_relevant_layers<I, S>(mut self, layers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.relevant_layer_ids = layers.into_iter().map(Into::into).collect();
        self
    }

    /// Set the delta consumer group id.
    #[must_use]
    pub fn with_group_id(mut self, group_id: impl Into<String>) -> Self {
        self.group_id = group_id.into();
        self
    }

    /// Enable the local snapshot mirror at `path`.
    #[must_use]
    pub fn with_local_cache_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.local_cache_path = Some(path.into());
        self
    }

    /// Set the local cache TTL.
    #[must_use]
    pub fn with_local_cache_ttl(mut self, ttl: Duration) -> Self {
        self.local_cache_ttl = ttl;
        self
    }

    /// Load debug overrides from `path`.
    #[must_use]
    pub fn with_overrides_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.overrides_file_path = Some(path.into());
        self
    }

    /// Cap the startup jitter (zero disables it; useful in tests).
    #[must_use]
    pub fn with_startup_jitter(mut self, jitter: Duration) -> Self {
        self.startup_jitter = jitter;
        self
    }
}
