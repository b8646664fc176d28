//! `POST /decide` - evaluate a user against the embedded SDK client.

use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::State;
use axum::Json;
use serde::{Deserialize, Serialize};

use abx_types::AttrValue;

use crate::error::ApiError;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct DecideRequest {
    pub user_id: String,
    #[serde(default)]
    pub attributes: HashMap<String, AttrValue>,
}

#[derive(Debug, Serialize)]
pub struct DecideResponse {
    /// Experiment id to assigned variant name.
    pub assignments: HashMap<String, String>,
}

/// Evaluate the user against the current cache.
pub async fn decide(
    State(state): State<Arc<AppState>>,
    Json(request): Json<DecideRequest>,
) -> Result<Json<DecideResponse>, ApiError> {
    let decider = state
        .decider
        .as_ref()
        .ok_or(ApiError::Unavailable("no configuration loaded yet"))?;

    Ok(Json(DecideResponse {
        assignments: decider.decide(&request.user_id, &request.attributes),
    }))
}
