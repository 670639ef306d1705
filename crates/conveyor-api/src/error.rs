//! API errors and their HTTP mapping.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

use conveyor_scheduler::SchedulerError;
use conveyor_store::StoreError;

/// API error types. Every variant renders as `{"error": "<message>"}`.
#[derive(Debug, Error)]
pub enum ApiError {
    /// Malformed or invalid request body.
    #[error("{0}")]
    BadRequest(String),

    /// Unknown workflow, task or worker.
    #[error("{0}")]
    NotFound(String),

    /// Backend failure.
    #[error("{0}")]
    Internal(String),
}

impl ApiError {
    fn status_code(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

impl From<StoreError> for ApiError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::WorkflowNotFound(_) | StoreError::TaskNotFound(_) => {
                ApiError::NotFound(e.to_string())
            }
            StoreError::Validation(_) => ApiError::BadRequest(e.to_string()),
            StoreError::Storage(_) => ApiError::Internal(e.to_string()),
        }
    }
}

impl From<SchedulerError> for ApiError {
    fn from(e: SchedulerError) -> Self {
        match e {
            SchedulerError::Store(inner) => inner.into(),
            SchedulerError::Validation(inner) => ApiError::BadRequest(inner.to_string()),
            SchedulerError::Queue(inner) => ApiError::Internal(inner.to_string()),
        }
    }
}

impl From<conveyor_queue::QueueError> for ApiError {
    fn from(e: conveyor_queue::QueueError) -> Self {
        match e {
            conveyor_queue::QueueError::WorkerNotFound(_) => ApiError::NotFound(e.to_string()),
            _ => ApiError::Internal(e.to_string()),
        }
    }
}
