//! Label vocabulary and content browsing
//!
//! Both endpoints are stateless reads; browsing content for a label never
//! touches any session.

use axum::{
    extract::{Path, State},
    routing::get,
    Json, Router,
};
use serde::Serialize;
use tracing::debug;

use crate::content::ResolvedContent;
use crate::error::ApiResult;
use crate::label::Label;
use crate::AppState;

#[derive(Debug, Serialize)]
pub struct LabelsResponse {
    pub labels: Vec<Label>,
}

#[derive(Debug, Serialize)]
pub struct ContentResponse {
    #[serde(flatten)]
    pub content: ResolvedContent,
    pub has_content: bool,
}

impl From<ResolvedContent> for ContentResponse {
    fn from(content: ResolvedContent) -> Self {
        Self {
            has_content: !content.is_empty(),
            content,
        }
    }
}

/// GET /api/labels
///
/// Waits for the model: the vocabulary is part of it.
pub async fn list_labels(State(state): State<AppState>) -> ApiResult<Json<LabelsResponse>> {
    let predictor = state.loader.ensure_model().await?;
    Ok(Json(LabelsResponse {
        labels: predictor.labels().to_vec(),
    }))
}

/// GET /api/content/:label
pub async fn get_content(
    State(state): State<AppState>,
    Path(label): Path<String>,
) -> Json<ContentResponse> {
    debug!(label = %label, "Resolving content");
    Json(state.registry.resolve(&label).into())
}

pub fn label_routes() -> Router<AppState> {
    Router::new()
        .route("/api/labels", get(list_labels))
        .route("/api/content/:label", get(get_content))
}
