//! API Error Handling
//!
//! Unified error types and conversion for API responses.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};

use crate::repository::StoreError;
use crate::service::{RunServiceError, WorkflowServiceError};

/// API error type
#[derive(Debug)]
pub enum ApiError {
    NotFound(String),
    BadRequest(String),
    ServiceUnavailable(String),
    StoreError(StoreError),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::ServiceUnavailable(msg) => (StatusCode::SERVICE_UNAVAILABLE, msg),
            ApiError::StoreError(err) => {
                tracing::error!("Store error: {:?}", err);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                )
            }
        };

        (status, Json(serde_json::json!({ "error": message }))).into_response()
    }
}

impl From<WorkflowServiceError> for ApiError {
    fn from(err: WorkflowServiceError) -> Self {
        match err {
            WorkflowServiceError::Parse(_) | WorkflowServiceError::Validation(_) => {
                ApiError::BadRequest(err.to_string())
            }
            WorkflowServiceError::NotFound(_) => ApiError::NotFound(err.to_string()),
            WorkflowServiceError::Store(err) => ApiError::StoreError(err),
        }
    }
}

impl From<RunServiceError> for ApiError {
    fn from(err: RunServiceError) -> Self {
        match err {
            RunServiceError::WorkflowNotFound(_) | RunServiceError::RunNotFound(_) => {
                ApiError::NotFound(err.to_string())
            }
            RunServiceError::ShuttingDown => ApiError::ServiceUnavailable(err.to_string()),
            RunServiceError::Store(err) => ApiError::StoreError(err),
        }
    }
}

pub type ApiResult<T> = Result<T, ApiError>;
