//! Session endpoints
//!
//! Each session is locked for the whole of a request, so two submissions to
//! the same session are handled one after the other. CPU-heavy work (decode
//! and inference) runs on the blocking pool.

use axum::{
    extract::{FromRequest, Multipart, Path, Request, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use bytes::Bytes;
use serde::Serialize;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::api::labels::ContentResponse;
use crate::error::{ApiError, ApiResult};
use crate::imaging;
use crate::label::Label;
use crate::prediction::RankedLabel;
use crate::session::{SessionHandle, SessionPhase, SessionState};
use crate::AppState;

/// Multipart field carrying the image
const IMAGE_FIELD: &str = "image";

#[derive(Debug, Serialize)]
pub struct CreatedSession {
    pub session_id: Uuid,
    pub phase: SessionPhase,
}

#[derive(Debug, Serialize)]
pub struct PredictionView {
    pub label: Label,
    pub ranked: Vec<RankedLabel>,
}

/// What the UI renders for a session
#[derive(Debug, Serialize)]
pub struct SessionView {
    pub session_id: Uuid,
    pub phase: SessionPhase,
    pub has_image: bool,
    pub prediction: Option<PredictionView>,
    /// Content for the predicted label
    pub content: Option<ContentResponse>,
}

impl SessionView {
    fn build(id: Uuid, state: &SessionState, app: &AppState) -> Self {
        let prediction = state.last_prediction().map(|p| PredictionView {
            label: p.label.clone(),
            ranked: p.distribution.ranked(),
        });
        let content = state
            .predicted_label()
            .map(|label| app.registry.resolve(label.as_str()).into());

        Self {
            session_id: id,
            phase: state.phase(),
            has_image: state.current_image().is_some(),
            prediction,
            content,
        }
    }
}

async fn find_session(app: &AppState, id: Uuid) -> ApiResult<SessionHandle> {
    app.sessions
        .get(&id)
        .await
        .ok_or_else(|| ApiError::NotFound(format!("session {}", id)))
}

/// POST /api/sessions
pub async fn create_session(State(state): State<AppState>) -> (StatusCode, Json<CreatedSession>) {
    let session_id = state.sessions.create().await;
    info!(session_id = %session_id, "Session created");

    (
        StatusCode::CREATED,
        Json(CreatedSession {
            session_id,
            phase: SessionPhase::Empty,
        }),
    )
}

/// GET /api/sessions/:id
pub async fn get_session(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<SessionView>> {
    let handle = find_session(&state, id).await?;
    let session = handle.lock().await;
    Ok(Json(SessionView::build(id, &session, &state)))
}

/// DELETE /api/sessions/:id
pub async fn delete_session(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<StatusCode> {
    if state.sessions.remove(&id).await {
        info!(session_id = %id, "Session deleted");
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::NotFound(format!("session {}", id)))
    }
}

/// POST /api/sessions/:id/image
///
/// Accepts `multipart/form-data` with an `image` field, or the image as the
/// raw request body. The image is stored first; a pipeline failure leaves the
/// session in `image_ready` so the client can resubmit.
pub async fn submit_image(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    request: Request,
) -> ApiResult<Json<SessionView>> {
    let handle = find_session(&state, id).await?;
    let raw = read_image_body(request).await?;
    debug!(session_id = %id, bytes = raw.len(), "Image submitted");

    let mut session = handle.lock().await;
    let submitted = std::mem::take(&mut *session).submit_image(raw);

    let predictor = match state.loader.ensure_model().await {
        Ok(predictor) => predictor,
        Err(e) => {
            *session = submitted;
            return Err(e.into());
        }
    };

    let fallback = submitted.clone();
    let outcome = tokio::task::spawn_blocking(move || submitted.predict(predictor.as_ref())).await;

    match outcome {
        Ok(Ok(next)) => {
            *session = next;
            if let Some(label) = session.predicted_label() {
                info!(session_id = %id, label = %label, "Prediction complete");
            }
            Ok(Json(SessionView::build(id, &session, &state)))
        }
        Ok(Err(failed)) => {
            warn!(session_id = %id, "Prediction failed: {}", failed.error);
            *session = failed.state;
            Err(failed.error.into())
        }
        Err(e) => {
            *session = fallback;
            Err(ApiError::Internal(format!("prediction task failed: {}", e)))
        }
    }
}

/// GET /api/sessions/:id/image
///
/// The session's image after normalization, as PNG.
pub async fn get_session_image(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Response> {
    let handle = find_session(&state, id).await?;
    let raw = handle
        .lock()
        .await
        .current_image()
        .cloned()
        .ok_or_else(|| ApiError::NotFound(format!("session {} has no image", id)))?;

    let png = tokio::task::spawn_blocking(move || -> ApiResult<Vec<u8>> {
        let image = imaging::normalize(&raw)?;
        image
            .encode_png()
            .map_err(|e| ApiError::Internal(format!("PNG encode failed: {}", e)))
    })
    .await
    .map_err(|e| ApiError::Internal(format!("preview task failed: {}", e)))??;

    Ok(([(header::CONTENT_TYPE, "image/png")], png).into_response())
}

/// Body read failures keep axum's status, so an oversized upload is a 413
fn body_error(status: StatusCode, message: String) -> ApiError {
    if status == StatusCode::PAYLOAD_TOO_LARGE {
        ApiError::PayloadTooLarge(message)
    } else {
        ApiError::BadRequest(message)
    }
}

async fn read_image_body(request: Request) -> ApiResult<Bytes> {
    let is_multipart = request
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|ct| ct.starts_with("multipart/form-data"));

    if !is_multipart {
        return Bytes::from_request(request, &())
            .await
            .map_err(|e| body_error(e.status(), e.body_text()));
    }

    let mut multipart = Multipart::from_request(request, &())
        .await
        .map_err(|e| body_error(e.status(), e.body_text()))?;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| body_error(e.status(), e.body_text()))?
    {
        if field.name() == Some(IMAGE_FIELD) {
            return field
                .bytes()
                .await
                .map_err(|e| body_error(e.status(), e.body_text()));
        }
    }

    Err(ApiError::BadRequest(format!(
        "multipart form has no `{}` field",
        IMAGE_FIELD
    )))
}

pub fn session_routes() -> Router<AppState> {
    Router::new()
        .route("/api/sessions", post(create_session))
        .route("/api/sessions/:id", get(get_session).delete(delete_session))
        .route(
            "/api/sessions/:id/image",
            post(submit_image).get(get_session_image),
        )
}
