//! CRUD handlers for experiments.
//!
//! The server owns the system fields: `id` and `salt` are generated once
//! at creation and never accepted from the caller, and every write stamps
//! a fresh `config_version`.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use uuid::Uuid;

use abx_types::{
    ConfigVersion, Experiment, ExperimentStatus, OverrideLists, TargetingRule, Variant,
};

use crate::error::ApiError;
use crate::state::AppState;

/// Caller-supplied portion of an experiment.
#[derive(Debug, Deserialize)]
pub struct ExperimentBody {
    pub layer_id: String,
    #[serde(default)]
    pub end_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub status: Option<ExperimentStatus>,
    #[serde(default)]
    pub targeting_rules: Vec<TargetingRule>,
    #[serde(default)]
    pub override_lists: OverrideLists,
    #[serde(default)]
    pub variants: Vec<Variant>,
}

/// `POST /experiments` - new experiments always start as DRAFT.
pub async fn create_experiment(
    State(state): State<Arc<AppState>>,
    Json(body): Json<ExperimentBody>,
) -> Result<(StatusCode, Json<Experiment>), ApiError> {
    let exp = Experiment {
        id: Uuid::new_v4().to_string(),
        layer_id: body.layer_id,
        config_version: ConfigVersion::generate(),
        end_time: body.end_time,
        salt: Uuid::new_v4().to_string(),
        status: ExperimentStatus::Draft,
        targeting_rules: body.targeting_rules,
        override_lists: body.override_lists,
        variants: body.variants,
    };
    exp.validate()
        .map_err(|e| ApiError::Validation(e.to_string()))?;

    state.store.create(&exp)?;
    Ok((StatusCode::CREATED, Json(exp)))
}

/// `GET /experiments/{id}`
pub async fn get_experiment(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<Experiment>, ApiError> {
    match state.store.find_by_id(&id)? {
        Some(exp) => Ok(Json(exp)),
        None => Err(ApiError::NotFound(id)),
    }
}

/// `PUT /experiments/{id}` - `id` and `salt` are preserved from the
/// stored record; everything else is replaced and a fresh
/// `config_version` is stamped.
pub async fn update_experiment(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(body): Json<ExperimentBody>,
) -> Result<Json<Experiment>, ApiError> {
    let existing = state
        .store
        .find_by_id(&id)?
        .ok_or_else(|| ApiError::NotFound(id.clone()))?;

    let exp = Experiment {
        id: existing.id,
        layer_id: body.layer_id,
        config_version: ConfigVersion::generate(),
        end_time: body.end_time,
        salt: existing.salt,
        status: body.status.unwrap_or(existing.status),
        targeting_rules: body.targeting_rules,
        override_lists: body.override_lists,
        variants: body.variants,
    };
    exp.validate()
        .map_err(|e| ApiError::Validation(e.to_string()))?;

    state.store.update(&exp)?;
    Ok(Json(exp))
}

/// `DELETE /experiments/{id}`
pub async fn delete_experiment(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    state.store.delete(&id)?;
    Ok(StatusCode::NO_CONTENT)
}
