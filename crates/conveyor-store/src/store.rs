//! State store trait and shared transition rules.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use uuid::Uuid;

use conveyor_core::{Task, TaskStatus, Workflow, WorkflowStatus};

use crate::error::StoreError;

/// Paging and filtering for workflow listings.
#[derive(Debug, Clone)]
pub struct ListParams {
    /// Restrict to one status.
    pub status: Option<WorkflowStatus>,
    /// 1-based page number.
    pub page: usize,
    /// Page size; clamped to 100.
    pub limit: usize,
}

impl Default for ListParams {
    fn default() -> Self {
        Self {
            status: None,
            page: 1,
            limit: 20,
        }
    }
}

impl ListParams {
    pub(crate) fn effective_limit(&self) -> usize {
        self.limit.clamp(1, 100)
    }

    pub(crate) fn offset(&self) -> usize {
        self.page.max(1).saturating_sub(1) * self.effective_limit()
    }
}

/// One page of workflows, newest first.
#[derive(Debug, Clone)]
pub struct WorkflowPage {
    pub workflows: Vec<Workflow>,
    pub total: usize,
    pub page: usize,
    pub limit: usize,
}

/// Durable authoritative record of workflows and tasks.
///
/// Every method is a single atomic operation against the backend.
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Insert a workflow and all of its tasks atomically. Rejects an invalid
    /// dependency graph without writing anything.
    async fn create_workflow(&self, workflow: &Workflow) -> Result<(), StoreError>;

    /// Fetch a workflow with its tasks hydrated in creation order.
    async fn get_workflow(&self, id: Uuid) -> Result<Workflow, StoreError>;

    /// List workflows, newest first, with optional status filter.
    async fn list_workflows(&self, params: &ListParams) -> Result<WorkflowPage, StoreError>;

    /// Workflows with status pending or running, tasks hydrated. The
    /// completion monitor's scan path.
    async fn get_active_workflows(&self) -> Result<Vec<Workflow>, StoreError>;

    /// Idempotently set workflow status. The first transition to running
    /// stamps `started_at`; any terminal status stamps `completed_at`.
    async fn update_workflow_status(
        &self,
        id: Uuid,
        status: WorkflowStatus,
    ) -> Result<(), StoreError>;

    /// Insert a single task.
    async fn create_task(&self, task: &Task) -> Result<(), StoreError>;

    /// Fetch one task.
    async fn get_task(&self, id: Uuid) -> Result<Task, StoreError>;

    /// Tasks owned by a workflow, in creation order.
    async fn get_tasks_by_workflow(&self, workflow_id: Uuid) -> Result<Vec<Task>, StoreError>;

    /// Apply a status transition with its side effects and return the
    /// updated task. A task already in a terminal status is returned
    /// unchanged (transitions are idempotent at-least-once).
    async fn update_task_status(
        &self,
        id: Uuid,
        status: TaskStatus,
        result: Option<Value>,
        error: Option<String>,
    ) -> Result<Task, StoreError>;

    /// Tasks with status pending or retrying, ordered by priority DESC then
    /// created_at ASC (id as the final tiebreak). The scheduler's hot path.
    async fn get_pending_tasks(&self) -> Result<Vec<Task>, StoreError>;

    /// Delete a workflow and, by cascade, every task it owns.
    async fn delete_workflow(&self, id: Uuid) -> Result<(), StoreError>;

    /// Workflow counts by status, for metrics.
    async fn workflow_counts(&self) -> Result<HashMap<WorkflowStatus, usize>, StoreError>;

    /// Task counts by status, for metrics.
    async fn task_counts(&self) -> Result<HashMap<TaskStatus, usize>, StoreError>;
}

/// Apply a task status transition in place.
///
/// Returns `false` and leaves the task untouched when it already holds a
/// terminal status — late or duplicate reports for finished tasks are
/// no-ops.
pub(crate) fn apply_task_status(
    task: &mut Task,
    status: TaskStatus,
    result: Option<Value>,
    error: Option<String>,
) -> bool {
    if task.status.is_terminal() {
        return false;
    }

    let now = Utc::now();
    match status {
        TaskStatus::Running => {
            if task.started_at.is_none() {
                task.started_at = Some(now);
            }
        }
        TaskStatus::Completed => {
            task.result = Some(result.unwrap_or(Value::Null));
            task.completed_at = Some(now);
        }
        TaskStatus::Failed => {
            task.error = Some(error.unwrap_or_else(|| "task failed".to_string()));
            task.completed_at = Some(now);
        }
        TaskStatus::Retrying => {
            if task.retry_count < task.max_retries {
                task.retry_count += 1;
            }
            if let Some(message) = error {
                task.error = Some(message);
            }
        }
        TaskStatus::Cancelled => {
            task.completed_at = Some(now);
        }
        TaskStatus::Pending => {}
    }
    task.status = status;
    task.updated_at = now;
    true
}

/// Apply a workflow status transition in place. Idempotent: repeated calls
/// with the same status only bump `updated_at`.
pub(crate) fn apply_workflow_status(workflow: &mut Workflow, status: WorkflowStatus) {
    let now = Utc::now();
    if status == WorkflowStatus::Running && workflow.started_at.is_none() {
        workflow.started_at = Some(now);
    }
    if status.is_terminal() && workflow.completed_at.is_none() {
        workflow.completed_at = Some(now);
    }
    workflow.status = status;
    workflow.updated_at = now;
}

/// Ordering for the pending-task scan: priority DESC, created_at ASC, id ASC.
pub(crate) fn pending_order(a: &Task, b: &Task) -> std::cmp::Ordering {
    b.priority
        .cmp(&a.priority)
        .then_with(|| a.created_at.cmp(&b.created_at))
        .then_with(|| a.id.cmp(&b.id))
}
