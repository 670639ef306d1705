//! Scheduler errors.

use thiserror::Error;

use conveyor_queue::QueueError;
use conveyor_store::StoreError;

/// Scheduler error types.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// State store failure.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Work queue failure.
    #[error(transparent)]
    Queue(#[from] QueueError),

    /// Submission failed validation.
    #[error(transparent)]
    Validation(#[from] conveyor_core::CoreError),
}
