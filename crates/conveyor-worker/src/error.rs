//! Worker errors.

use thiserror::Error;

use conveyor_queue::QueueError;

/// Worker runtime error types.
#[derive(Debug, Error)]
pub enum WorkerError {
    /// Queue operation failed.
    #[error(transparent)]
    Queue(#[from] QueueError),

    /// No executor registered for a task type.
    #[error("no executor registered for task type '{0}'")]
    UnknownTaskType(String),

    /// Task body failed. Governed by the retry policy, not a system error.
    #[error("{0}")]
    Execution(String),

    /// Status callback failed.
    #[error("status report failed: {0}")]
    Report(String),
}
