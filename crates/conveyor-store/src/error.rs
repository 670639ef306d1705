//! Store errors.

use thiserror::Error;
use uuid::Uuid;

/// State store error types.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Workflow does not exist.
    #[error("workflow not found: {0}")]
    WorkflowNotFound(Uuid),

    /// Task does not exist.
    #[error("task not found: {0}")]
    TaskNotFound(Uuid),

    /// Submission failed validation; nothing was written.
    #[error(transparent)]
    Validation(#[from] conveyor_core::CoreError),

    /// Backend I/O or serialization failure.
    #[error("storage error: {0}")]
    Storage(String),
}
