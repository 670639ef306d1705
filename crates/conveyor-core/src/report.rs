//! Wire contract for worker → orchestrator status callbacks.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::task::TaskStatus;

/// Outcome report sent by a worker for one task attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusReport {
    /// The task this report concerns.
    pub task_id: Uuid,
    /// Reported status: running, completed, failed or retrying.
    pub status: TaskStatus,
    /// Result value, expected when status is completed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    /// Error message, expected when status is failed or retrying.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl StatusReport {
    /// Report that a worker started executing the task.
    pub fn running(task_id: Uuid) -> Self {
        Self {
            task_id,
            status: TaskStatus::Running,
            result: None,
            error: None,
        }
    }

    /// Report a successful outcome.
    pub fn completed(task_id: Uuid, result: Value) -> Self {
        Self {
            task_id,
            status: TaskStatus::Completed,
            result: Some(result),
            error: None,
        }
    }

    /// Report a failed attempt that will be retried.
    pub fn retrying(task_id: Uuid, error: impl Into<String>) -> Self {
        Self {
            task_id,
            status: TaskStatus::Retrying,
            result: None,
            error: Some(error.into()),
        }
    }

    /// Report a terminal failure.
    pub fn failed(task_id: Uuid, error: impl Into<String>) -> Self {
        Self {
            task_id,
            status: TaskStatus::Failed,
            result: None,
            error: Some(error.into()),
        }
    }
}

/// Acknowledgement returned by the status ingress.
///
/// Carries the authoritative status after the report was applied, which is
/// how a worker detects that a redelivered task already reached a terminal
/// outcome elsewhere.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusAck {
    /// The task's status in the state store after applying the report.
    pub status: TaskStatus,
}
