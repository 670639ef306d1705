//! In-memory state store.

use std::collections::HashMap;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::RwLock;
use tracing::{debug, info};
use uuid::Uuid;

use conveyor_core::{dag, Task, TaskStatus, Workflow, WorkflowStatus};

use crate::error::StoreError;
use crate::store::{
    apply_task_status, apply_workflow_status, pending_order, ListParams, StateStore, WorkflowPage,
};

#[derive(Default)]
struct Inner {
    /// Workflows keyed by id; `tasks` kept empty, hydrated on read.
    workflows: HashMap<Uuid, Workflow>,
    /// All tasks keyed by id.
    tasks: HashMap<Uuid, Task>,
    /// Task ids per workflow, in creation order.
    workflow_tasks: HashMap<Uuid, Vec<Uuid>>,
}

impl Inner {
    fn hydrate(&self, workflow: &Workflow) -> Workflow {
        let mut wf = workflow.clone();
        wf.tasks = self
            .workflow_tasks
            .get(&wf.id)
            .map(|ids| {
                ids.iter()
                    .filter_map(|id| self.tasks.get(id).cloned())
                    .collect()
            })
            .unwrap_or_default();
        wf
    }
}

/// In-memory store for tests and single-node setups.
pub struct MemoryStore {
    inner: RwLock<Inner>,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Inner::default()),
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StateStore for MemoryStore {
    async fn create_workflow(&self, workflow: &Workflow) -> Result<(), StoreError> {
        dag::validate(&workflow.tasks)?;

        let mut inner = self.inner.write().await;
        let mut record = workflow.clone();
        let tasks = std::mem::take(&mut record.tasks);

        let ids: Vec<Uuid> = tasks.iter().map(|t| t.id).collect();
        info!("created workflow {} ({} tasks)", record.id, ids.len());
        for task in tasks {
            inner.tasks.insert(task.id, task);
        }
        inner.workflow_tasks.insert(record.id, ids);
        inner.workflows.insert(record.id, record);
        Ok(())
    }

    async fn get_workflow(&self, id: Uuid) -> Result<Workflow, StoreError> {
        let inner = self.inner.read().await;
        inner
            .workflows
            .get(&id)
            .map(|wf| inner.hydrate(wf))
            .ok_or(StoreError::WorkflowNotFound(id))
    }

    async fn list_workflows(&self, params: &ListParams) -> Result<WorkflowPage, StoreError> {
        let inner = self.inner.read().await;
        let mut matching: Vec<&Workflow> = inner
            .workflows
            .values()
            .filter(|wf| params.status.map_or(true, |s| wf.status == s))
            .collect();
        // Newest first, id as a deterministic tiebreak.
        matching.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| a.id.cmp(&b.id)));

        let total = matching.len();
        let limit = params.effective_limit();
        let workflows = matching
            .into_iter()
            .skip(params.offset())
            .take(limit)
            .map(|wf| inner.hydrate(wf))
            .collect();

        Ok(WorkflowPage {
            workflows,
            total,
            page: params.page.max(1),
            limit,
        })
    }

    async fn get_active_workflows(&self) -> Result<Vec<Workflow>, StoreError> {
        let inner = self.inner.read().await;
        Ok(inner
            .workflows
            .values()
            .filter(|wf| {
                matches!(wf.status, WorkflowStatus::Pending | WorkflowStatus::Running)
            })
            .map(|wf| inner.hydrate(wf))
            .collect())
    }

    async fn update_workflow_status(
        &self,
        id: Uuid,
        status: WorkflowStatus,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        let workflow = inner
            .workflows
            .get_mut(&id)
            .ok_or(StoreError::WorkflowNotFound(id))?;
        apply_workflow_status(workflow, status);
        debug!("workflow {id} -> {status}");
        Ok(())
    }

    async fn create_task(&self, task: &Task) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        if !inner.workflows.contains_key(&task.workflow_id) {
            return Err(StoreError::WorkflowNotFound(task.workflow_id));
        }
        inner
            .workflow_tasks
            .entry(task.workflow_id)
            .or_default()
            .push(task.id);
        inner.tasks.insert(task.id, task.clone());
        Ok(())
    }

    async fn get_task(&self, id: Uuid) -> Result<Task, StoreError> {
        let inner = self.inner.read().await;
        inner
            .tasks
            .get(&id)
            .cloned()
            .ok_or(StoreError::TaskNotFound(id))
    }

    async fn get_tasks_by_workflow(&self, workflow_id: Uuid) -> Result<Vec<Task>, StoreError> {
        let inner = self.inner.read().await;
        if !inner.workflows.contains_key(&workflow_id) {
            return Err(StoreError::WorkflowNotFound(workflow_id));
        }
        Ok(inner
            .workflow_tasks
            .get(&workflow_id)
            .map(|ids| {
                ids.iter()
                    .filter_map(|id| inner.tasks.get(id).cloned())
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn update_task_status(
        &self,
        id: Uuid,
        status: TaskStatus,
        result: Option<Value>,
        error: Option<String>,
    ) -> Result<Task, StoreError> {
        let mut inner = self.inner.write().await;
        let task = inner.tasks.get_mut(&id).ok_or(StoreError::TaskNotFound(id))?;
        if apply_task_status(task, status, result, error) {
            debug!("task {id} -> {status}");
        } else {
            debug!("task {id} already terminal, ignoring {status}");
        }
        Ok(task.clone())
    }

    async fn get_pending_tasks(&self) -> Result<Vec<Task>, StoreError> {
        let inner = self.inner.read().await;
        let mut pending: Vec<Task> = inner
            .tasks
            .values()
            .filter(|t| t.status.is_schedulable())
            .cloned()
            .collect();
        pending.sort_by(pending_order);
        Ok(pending)
    }

    async fn delete_workflow(&self, id: Uuid) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        inner
            .workflows
            .remove(&id)
            .ok_or(StoreError::WorkflowNotFound(id))?;
        if let Some(ids) = inner.workflow_tasks.remove(&id) {
            for task_id in ids {
                inner.tasks.remove(&task_id);
            }
        }
        info!("deleted workflow {id}");
        Ok(())
    }

    async fn workflow_counts(&self) -> Result<HashMap<WorkflowStatus, usize>, StoreError> {
        let inner = self.inner.read().await;
        let mut counts = HashMap::new();
        for wf in inner.workflows.values() {
            *counts.entry(wf.status).or_insert(0) += 1;
        }
        Ok(counts)
    }

    async fn task_counts(&self) -> Result<HashMap<TaskStatus, usize>, StoreError> {
        let inner = self.inner.read().await;
        let mut counts = HashMap::new();
        for task in inner.tasks.values() {
            *counts.entry(task.status).or_insert(0) += 1;
        }
        Ok(counts)
    }
}
