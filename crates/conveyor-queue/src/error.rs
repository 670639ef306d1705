//! Queue errors.

use thiserror::Error;
use uuid::Uuid;

/// Work queue error types.
#[derive(Debug, Error)]
pub enum QueueError {
    /// Heartbeat for a worker that never registered or whose TTL expired.
    #[error("worker not found: {0}")]
    WorkerNotFound(Uuid),

    /// Payload could not be encoded or decoded.
    #[error("queue payload error: {0}")]
    Payload(String),

    /// Remote queue endpoint unreachable or returned an error.
    #[error("queue transport error: {0}")]
    Transport(String),
}
