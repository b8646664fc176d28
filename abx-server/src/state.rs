//! Shared application state for the admin server.

use std::sync::Arc;

use chrono::{DateTime, Utc};

use abx_sdk::AbClient;
use abx_store::ExperimentStore;

/// Shared state accessible by all handlers.
pub struct AppState {
    /// The write path: experiments + transactional outbox.
    pub store: Arc<ExperimentStore>,
    /// Embedded SDK client answering `POST /decide`. Absent when the
    /// snapshot bucket was empty at startup; the endpoint then returns
    /// 503 until the process is restarted with data available.
    pub decider: Option<Arc<AbClient>>,
    /// When the server started.
    pub started_at: DateTime<Utc>,
}

impl AppState {
    /// Create state over a repository, without a decision engine.
    pub fn new(store: Arc<ExperimentStore>) -> Self {
        Self {
            store,
            decider: None,
            started_at: Utc::now(),
        }
    }

    /// Attach the embedded SDK client.
    #[must_use]
    pub fn with_decider(mut self, decider: Arc<AbClient>) -> Self {
        self.decider = Some(decider);
        self
    }

    /// Seconds since the server started.
    pub fn uptime_seconds(&self) -> i64 {
        (Utc::now() - self.started_at).num_seconds()
    }
}
