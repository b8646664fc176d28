//! HTTP surface of the admin server.

pub mod decide;
pub mod experiments;

use std::sync::Arc;

use axum::extract::State;
use axum::routing::{get, post};
use axum::{Json, Router};
use prometheus::{Encoder, TextEncoder};
use serde::{Deserialize, Serialize};

use crate::state::AppState;

/// Build the admin router.
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/metrics", get(metrics))
        .route("/experiments", post(experiments::create_experiment))
        .route(
            "/experiments/:id",
            get(experiments::get_experiment)
                .put(experiments::update_experiment)
                .delete(experiments::delete_experiment),
        )
        .route("/decide", post(decide::decide))
        .with_state(state)
}

/// Health check response.
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime_seconds: i64,
}

/// Health check endpoint.
pub async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds: state.uptime_seconds(),
    })
}

/// Prometheus scrape endpoint over the embedded client's registry.
pub async fn metrics(State(state): State<Arc<AppState>>) -> String {
    let Some(decider) = &state.decider else {
        return String::new();
    };

    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    if encoder
        .encode(&decider.metrics_registry().gather(), &mut buffer)
        .is_err()
    {
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}
