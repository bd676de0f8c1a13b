//! Error types for lablens-app
//!
//! `PipelineError` covers the four ways the classify pipeline can fail.
//! Download and load failures are fatal (no prediction is possible without a
//! model); decode and inference failures are scoped to one submission.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

/// Pipeline failure
///
/// Clone so a single failed model load can be handed to every caller that
/// was waiting on it.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum PipelineError {
    /// Remote fetch or local write failed while obtaining the model
    #[error("Model download failed: {0}")]
    Download(String),

    /// Model file is corrupt or incompatible
    #[error("Model load failed: {0}")]
    Load(String),

    /// Submitted bytes are not a supported image
    #[error("Image decode failed: {0}")]
    Decode(String),

    /// Predictor failed or returned a malformed result
    #[error("Inference failed: {0}")]
    Inference(String),
}

impl PipelineError {
    /// Fatal errors stop the application from serving predictions at all
    pub fn is_fatal(&self) -> bool {
        matches!(self, PipelineError::Download(_) | PipelineError::Load(_))
    }

    pub fn code(&self) -> &'static str {
        match self {
            PipelineError::Download(_) => "MODEL_DOWNLOAD_FAILED",
            PipelineError::Load(_) => "MODEL_LOAD_FAILED",
            PipelineError::Decode(_) => "DECODE_FAILED",
            PipelineError::Inference(_) => "INFERENCE_FAILED",
        }
    }
}

/// API error type
#[derive(Debug, Error)]
pub enum ApiError {
    /// Pipeline failure (503 when fatal, 422 otherwise)
    #[error(transparent)]
    Pipeline(#[from] PipelineError),

    /// Resource not found (404)
    #[error("Resource not found: {0}")]
    NotFound(String),

    /// Invalid request (400)
    #[error("Invalid request: {0}")]
    BadRequest(String),

    /// Request body exceeds the upload limit (413)
    #[error("Payload too large: {0}")]
    PayloadTooLarge(String),

    /// Internal server error (500)
    #[error("Internal server error: {0}")]
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_code, message, fatal) = match self {
            ApiError::Pipeline(ref err) => {
                let status = if err.is_fatal() {
                    StatusCode::SERVICE_UNAVAILABLE
                } else {
                    StatusCode::UNPROCESSABLE_ENTITY
                };
                (status, err.code(), err.to_string(), err.is_fatal())
            }
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, "NOT_FOUND", msg, false),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg, false),
            ApiError::PayloadTooLarge(msg) => (
                StatusCode::PAYLOAD_TOO_LARGE,
                "PAYLOAD_TOO_LARGE",
                msg,
                false,
            ),
            ApiError::Internal(msg) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "INTERNAL_ERROR",
                msg,
                false,
            ),
        };

        let body = Json(json!({
            "error": {
                "code": error_code,
                "message": message,
                "fatal": fatal,
            }
        }));

        (status, body).into_response()
    }
}

/// Result type for API handlers
pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fatal_classification() {
        assert!(PipelineError::Download("x".into()).is_fatal());
        assert!(PipelineError::Load("x".into()).is_fatal());
        assert!(!PipelineError::Decode("x".into()).is_fatal());
        assert!(!PipelineError::Inference("x".into()).is_fatal());
    }

    #[test]
    fn test_status_codes() {
        let fatal = ApiError::from(PipelineError::Load("corrupt".into())).into_response();
        assert_eq!(fatal.status(), StatusCode::SERVICE_UNAVAILABLE);

        let recoverable = ApiError::from(PipelineError::Decode("bad bytes".into())).into_response();
        assert_eq!(recoverable.status(), StatusCode::UNPROCESSABLE_ENTITY);

        let missing = ApiError::NotFound("session".into()).into_response();
        assert_eq!(missing.status(), StatusCode::NOT_FOUND);

        let oversized = ApiError::PayloadTooLarge("body".into()).into_response();
        assert_eq!(oversized.status(), StatusCode::PAYLOAD_TOO_LARGE);
    }
}
