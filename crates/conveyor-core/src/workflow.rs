//! Workflow definition and status lifecycle.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::retry::RetryPolicy;
use crate::task::Task;

/// Workflow status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkflowStatus {
    /// Submitted; no task has been offered to a worker yet.
    Pending,
    /// At least one task has been scheduled and work remains.
    Running,
    /// Every task completed.
    Completed,
    /// At least one task exhausted its retries and nothing else can run.
    Failed,
    /// Cancelled by user request.
    Cancelled,
}

impl WorkflowStatus {
    /// Whether this status is a terminal outcome.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            WorkflowStatus::Completed | WorkflowStatus::Failed | WorkflowStatus::Cancelled
        )
    }
}

impl std::fmt::Display for WorkflowStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            WorkflowStatus::Pending => "pending",
            WorkflowStatus::Running => "running",
            WorkflowStatus::Completed => "completed",
            WorkflowStatus::Failed => "failed",
            WorkflowStatus::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// Execution configuration applied to a workflow's tasks.
///
/// Missing fields fall back to the defaults, so partial configurations are
/// accepted at submission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkflowConfig {
    /// Upper bound on concurrently running tasks, honoured by worker pool
    /// sizing rather than the scheduler.
    pub max_concurrency: u32,
    /// Overall workflow timeout.
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
    /// Retry policy template for owned tasks.
    pub retry_policy: RetryPolicy,
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            max_concurrency: 10,
            timeout: Duration::from_secs(3600),
            retry_policy: RetryPolicy::default(),
        }
    }
}

/// A named DAG of tasks submitted as a unit.
///
/// A workflow exclusively owns its tasks; deleting the workflow deletes them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Workflow {
    /// Unique workflow ID.
    pub id: Uuid,
    /// Human-readable name.
    pub name: String,
    /// Free-form description.
    pub description: String,
    /// Current status.
    pub status: WorkflowStatus,
    /// Owned tasks in creation order.
    pub tasks: Vec<Task>,
    /// Execution configuration.
    pub config: WorkflowConfig,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last update time.
    pub updated_at: DateTime<Utc>,
    /// First transition to running.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    /// Terminal transition time.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl Workflow {
    /// Create a new pending workflow with default configuration.
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            description: description.into(),
            status: WorkflowStatus::Pending,
            tasks: Vec::new(),
            config: WorkflowConfig::default(),
            created_at: now,
            updated_at: now,
            started_at: None,
            completed_at: None,
        }
    }

    /// Replace the execution configuration.
    pub fn with_config(mut self, config: WorkflowConfig) -> Self {
        self.config = config;
        self
    }

    /// Append an owned task.
    pub fn with_task(mut self, task: Task) -> Self {
        self.tasks.push(task);
        self
    }
}
