//! Task definition and status lifecycle.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Task status.
///
/// Tasks advance monotonically along pending → running → (completed | failed),
/// with a sideways edge to retrying (re-eligible after backoff) and an
/// administrative edge to cancelled from any non-terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    /// Waiting for dependencies or queue pickup.
    Pending,
    /// Leased to a worker.
    Running,
    /// Finished successfully; `result` is set.
    Completed,
    /// Retry budget exhausted; `error` is set.
    Failed,
    /// Failed but eligible for another attempt after backoff.
    Retrying,
    /// Cancelled administratively.
    Cancelled,
}

impl TaskStatus {
    /// Whether this status is a terminal outcome.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled
        )
    }

    /// Whether a task in this status may be offered to the scheduler.
    pub fn is_schedulable(&self) -> bool {
        matches!(self, TaskStatus::Pending | TaskStatus::Retrying)
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Running => "running",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
            TaskStatus::Retrying => "retrying",
            TaskStatus::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// A single unit of work executed by one worker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    /// Unique task ID.
    pub id: Uuid,
    /// Owning workflow.
    pub workflow_id: Uuid,
    /// Name, unique within the workflow. Dependencies reference names.
    pub name: String,
    /// Opaque type string selecting a worker pool.
    #[serde(rename = "type")]
    pub task_type: String,
    /// Opaque structured payload; interpretation belongs to the task body.
    pub payload: Value,
    /// Current status.
    pub status: TaskStatus,
    /// Structured result, present iff completed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    /// Last error message, present iff failed or retrying.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Attempts consumed so far. Never exceeds `max_retries`.
    pub retry_count: u32,
    /// Retry budget.
    pub max_retries: u32,
    /// Scheduling priority; higher first.
    pub priority: i32,
    /// Names of sibling tasks that must complete first.
    pub dependencies: Vec<String>,
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

impl Task {
    /// Create a new pending task.
    pub fn new(
        workflow_id: Uuid,
        name: impl Into<String>,
        task_type: impl Into<String>,
        payload: Value,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            workflow_id,
            name: name.into(),
            task_type: task_type.into(),
            payload,
            status: TaskStatus::Pending,
            result: None,
            error: None,
            retry_count: 0,
            max_retries: 3,
            priority: 1,
            dependencies: Vec::new(),
            created_at: now,
            updated_at: now,
            started_at: None,
            completed_at: None,
        }
    }

    /// Set the scheduling priority.
    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    /// Set the retry budget.
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Set the dependency names.
    pub fn with_dependencies(mut self, dependencies: Vec<String>) -> Self {
        self.dependencies = dependencies;
        self
    }

    /// Whether another retry attempt is allowed.
    pub fn can_retry(&self) -> bool {
        self.retry_count < self.max_retries
    }

    /// Whether this task is eligible for scheduling given the set of
    /// completed sibling task names.
    pub fn can_execute(&self, completed: &HashSet<&str>) -> bool {
        self.status.is_schedulable()
            && self
                .dependencies
                .iter()
                .all(|dep| completed.contains(dep.as_str()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn new_task_defaults() {
        let task = Task::new(Uuid::new_v4(), "extract", "etl", json!({"a": 1}));
        assert_eq!(task.status, TaskStatus::Pending);
        assert_eq!(task.retry_count, 0);
        assert_eq!(task.max_retries, 3);
        assert_eq!(task.priority, 1);
        assert!(task.dependencies.is_empty());
        assert!(task.result.is_none());
    }

    #[test]
    fn terminal_statuses() {
        assert!(TaskStatus::Completed.is_terminal());
        assert!(TaskStatus::Failed.is_terminal());
        assert!(TaskStatus::Cancelled.is_terminal());
        assert!(!TaskStatus::Pending.is_terminal());
        assert!(!TaskStatus::Running.is_terminal());
        assert!(!TaskStatus::Retrying.is_terminal());
    }

    #[test]
    fn can_execute_requires_completed_dependencies() {
        let task = Task::new(Uuid::new_v4(), "load", "etl", Value::Null)
            .with_dependencies(vec!["extract".into(), "transform".into()]);

        let mut completed = HashSet::new();
        completed.insert("extract");
        assert!(!task.can_execute(&completed));

        completed.insert("transform");
        assert!(task.can_execute(&completed));
    }

    #[test]
    fn can_execute_rejects_non_schedulable_status() {
        let mut task = Task::new(Uuid::new_v4(), "t", "generic", Value::Null);
        let completed = HashSet::new();
        assert!(task.can_execute(&completed));

        task.status = TaskStatus::Running;
        assert!(!task.can_execute(&completed));

        task.status = TaskStatus::Retrying;
        assert!(task.can_execute(&completed));
    }

    #[test]
    fn status_roundtrips_as_lowercase() {
        assert_eq!(
            serde_json::to_string(&TaskStatus::Retrying).unwrap(),
            "\"retrying\""
        );
        let status: TaskStatus = serde_json::from_str("\"completed\"").unwrap();
        assert_eq!(status, TaskStatus::Completed);
    }

    #[test]
    fn can_retry_respects_budget() {
        let mut task = Task::new(Uuid::new_v4(), "t", "generic", Value::Null).with_max_retries(2);
        assert!(task.can_retry());
        task.retry_count = 2;
        assert!(!task.can_retry());
    }
}
