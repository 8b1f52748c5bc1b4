use crate::models::ApiError;
use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;

/// Request-level rejection. The core operations degrade instead of failing,
/// so the only errors surfaced over HTTP are bad inputs.
#[derive(Debug, Error)]
#[error("operation `{operation}` failed: {message}")]
pub struct ServiceError {
    operation: &'static str,
    message: String,
}

impl ServiceError {
    pub fn invalid_input(operation: &'static str, message: impl Into<String>) -> Self {
        Self {
            operation,
            message: message.into(),
        }
    }
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let payload = ApiError {
            error: self.operation.to_string(),
            detail: Some(self.message),
        };
        (StatusCode::BAD_REQUEST, Json(payload)).into_response()
    }
}
