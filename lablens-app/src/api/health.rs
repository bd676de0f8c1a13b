//! Health check endpoint
//!
//! Reports uptime and model readiness. The service answers while the model
//! is still loading; `status` only becomes "ok" once predictions can be made.

use axum::{extract::State, routing::get, Json, Router};
use chrono::Utc;
use serde::Serialize;

use crate::model::ModelStatus;
use crate::AppState;

#[derive(Debug, Serialize)]
pub struct ModelHealth {
    /// "loading", "ready" or "error"
    pub status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub labels: Option<usize>,
}

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// "ok", "starting" or "error"
    pub status: String,
    pub module: String,
    pub version: String,
    pub uptime_seconds: u64,
    pub model: ModelHealth,
    /// Last model load error, if the last attempt failed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

/// GET /health
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let uptime = Utc::now().signed_duration_since(state.startup_time);
    let uptime_seconds = uptime.num_seconds().max(0) as u64;

    let (status, model_status, last_error) = match state.loader.status() {
        ModelStatus::Ready => ("ok", "ready", None),
        ModelStatus::NotLoaded | ModelStatus::Loading => ("starting", "loading", None),
        ModelStatus::Failed(error) => ("error", "error", Some(error)),
    };
    let labels = state.loader.predictor().map(|p| p.labels().len());

    Json(HealthResponse {
        status: status.to_string(),
        module: "lablens".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds,
        model: ModelHealth {
            status: model_status,
            labels,
        },
        last_error,
    })
}

/// Build health check routes
pub fn health_routes() -> Router<AppState> {
    Router::new()
        .route("/health", get(health_check))
        .route("/api/buildinfo", get(super::get_build_info))
}
