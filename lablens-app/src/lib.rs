//! lablens-app library interface
//!
//! Image classification web app: one shared model, many independent
//! browser sessions, and a static content registry shown next to each
//! prediction.

pub mod api;
pub mod content;
pub mod error;
pub mod imaging;
pub mod label;
pub mod media;
pub mod model;
pub mod prediction;
pub mod session;

pub use crate::error::{ApiError, ApiResult, PipelineError};

use axum::extract::DefaultBodyLimit;
use axum::Router;
use chrono::{DateTime, Utc};
use content::LabelContentRegistry;
use model::ModelLoader;
use session::SessionStore;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub loader: Arc<ModelLoader>,
    pub registry: Arc<LabelContentRegistry>,
    pub sessions: SessionStore,
    /// Service startup timestamp for uptime tracking
    pub startup_time: DateTime<Utc>,
    /// Request body limit for image submissions
    pub max_upload_bytes: usize,
}

impl AppState {
    pub fn new(
        loader: Arc<ModelLoader>,
        registry: LabelContentRegistry,
        max_upload_bytes: usize,
    ) -> Self {
        Self {
            loader,
            registry: Arc::new(registry),
            sessions: SessionStore::new(),
            startup_time: Utc::now(),
            max_upload_bytes,
        }
    }
}

/// Build application router
pub fn build_router(state: AppState) -> Router {
    let body_limit = DefaultBodyLimit::max(state.max_upload_bytes);

    Router::new()
        .merge(api::ui_routes())
        .merge(api::label_routes())
        .merge(api::session_routes())
        .merge(api::health_routes())
        .layer(body_limit)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
