//! abx-server - admin API and background pipeline for the abx platform.
//!
//! One process owns the write path: the HTTP surface mutates experiments
//! through the repository (which records outbox rows transactionally),
//! the outbox worker drains those rows onto the delta topic, and the
//! snapshot generator periodically publishes full snapshots for client
//! bootstrap. An embedded SDK client serves `POST /decide`.

pub mod error;
pub mod http;
pub mod state;
pub mod workers;

use std::sync::Arc;

use tokio::net::TcpListener;

pub use error::ApiError;
pub use http::create_router;
pub use state::AppState;
pub use workers::{OutboxWorker, SnapshotGenerator, WorkerError};

/// Server bind configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
        }
    }
}

impl ServerConfig {
    /// The address string to bind.
    #[must_use]
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// The admin HTTP server.
pub struct AbxServer {
    config: ServerConfig,
    state: Arc<AppState>,
}

impl AbxServer {
    /// Create a server over the given state.
    pub fn new(config: ServerConfig, state: Arc<AppState>) -> Self {
        Self { config, state }
    }

    /// The shared application state.
    pub fn state(&self) -> Arc<AppState> {
        Arc::clone(&self.state)
    }

    /// Bind the configured address and serve until the task is dropped.
    pub async fn run(self) -> std::io::Result<()> {
        let addr = self.config.addr();
        let listener = TcpListener::bind(&addr).await?;
        tracing::info!(addr = %addr, "admin API listening");
        self.run_with_listener(listener).await
    }

    /// Serve on an existing listener (used by tests for ephemeral ports).
    pub async fn run_with_listener(self, listener: TcpListener) -> std::io::Result<()> {
        let router = create_router(self.state);
        axum::serve(listener, router).await
    }
}
