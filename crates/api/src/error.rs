use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;

use engine::{EngineError, StoreError};

/// Application-level error type for HTTP handlers.
///
/// Renders as `{"error": ..., "code": ...}` JSON.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(&'static str),

    #[error("{0} not found")]
    NotFound(&'static str),
}

pub type ApiResult<T> = Result<T, ApiError>;

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            ApiError::Engine(e) if e.is_validation() => {
                (StatusCode::BAD_REQUEST, "VALIDATION_ERROR", e.to_string())
            }
            ApiError::Engine(EngineError::RunNotFound(_) | EngineError::AutomationNotFound(_)) => {
                (StatusCode::NOT_FOUND, "NOT_FOUND", self.to_string())
            }
            ApiError::Engine(EngineError::InvalidPayload(_) | EngineError::UnsupportedJob(_)) => {
                (StatusCode::BAD_REQUEST, "BAD_REQUEST", self.to_string())
            }
            ApiError::Engine(EngineError::Store(StoreError::NotFound)) | ApiError::Store(StoreError::NotFound) => {
                (StatusCode::NOT_FOUND, "NOT_FOUND", "Resource not found".to_string())
            }
            ApiError::Engine(_) | ApiError::Store(_) => {
                tracing::error!(error = %self, "Internal error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "INTERNAL_ERROR",
                    "An internal error occurred".to_string(),
                )
            }
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg.clone()),
            ApiError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, "UNAUTHORIZED", (*msg).to_string()),
            ApiError::NotFound(_) => (StatusCode::NOT_FOUND, "NOT_FOUND", self.to_string()),
        };

        (status, axum::Json(json!({ "error": message, "code": code }))).into_response()
    }
}
