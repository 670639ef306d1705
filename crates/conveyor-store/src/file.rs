//! File-backed state store.
//!
//! Entities are stored as individual JSON files, with tasks organised by
//! status so the pending scan only touches two directories:
//!
//! ```text
//! {root}/
//! ├── workflows/
//! │   └── {uuid}.json
//! └── tasks/
//!     ├── pending/
//!     │   └── {uuid}.json
//!     ├── running/
//!     ├── completed/
//!     ├── failed/
//!     ├── retrying/
//!     └── cancelled/
//! ```
//!
//! A status transition rewrites the task file into its new status directory
//! and removes the old one. Single-orchestrator writes keep each call
//! atomic enough for this backend's intended use; a relational backend can
//! be slotted behind the same trait where stronger guarantees are needed.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde_json::Value;
use tokio::fs;
use tracing::{debug, warn};
use uuid::Uuid;

use conveyor_core::{dag, Task, TaskStatus, Workflow, WorkflowStatus};

use crate::error::StoreError;
use crate::store::{
    apply_task_status, apply_workflow_status, pending_order, ListParams, StateStore, WorkflowPage,
};

const TASK_STATUSES: [TaskStatus; 6] = [
    TaskStatus::Pending,
    TaskStatus::Running,
    TaskStatus::Completed,
    TaskStatus::Failed,
    TaskStatus::Retrying,
    TaskStatus::Cancelled,
];

/// JSON-file state store.
pub struct FileStore {
    root: PathBuf,
}

impl FileStore {
    /// Create a store rooted at `root`, creating the directory layout.
    pub async fn new(root: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let root = root.into();
        fs::create_dir_all(root.join("workflows"))
            .await
            .map_err(|e| StoreError::Storage(format!("failed to create workflows dir: {e}")))?;
        for status in TASK_STATUSES {
            fs::create_dir_all(root.join("tasks").join(status.to_string()))
                .await
                .map_err(|e| {
                    StoreError::Storage(format!("failed to create {status} dir: {e}"))
                })?;
        }
        debug!("file store initialised at {:?}", root);
        Ok(Self { root })
    }

    fn workflow_path(&self, id: Uuid) -> PathBuf {
        self.root.join("workflows").join(format!("{id}.json"))
    }

    fn task_path(&self, id: Uuid, status: TaskStatus) -> PathBuf {
        self.root
            .join("tasks")
            .join(status.to_string())
            .join(format!("{id}.json"))
    }

    /// Locate a task file across the status directories.
    async fn find_task_path(&self, id: Uuid) -> Option<(PathBuf, TaskStatus)> {
        for status in TASK_STATUSES {
            let path = self.task_path(id, status);
            if fs::try_exists(&path).await.unwrap_or(false) {
                return Some((path, status));
            }
        }
        None
    }

    async fn write_json<T: serde::Serialize>(path: &Path, value: &T) -> Result<(), StoreError> {
        let content = serde_json::to_string_pretty(value)
            .map_err(|e| StoreError::Storage(format!("serialize: {e}")))?;
        fs::write(path, content)
            .await
            .map_err(|e| StoreError::Storage(format!("write {path:?}: {e}")))
    }

    async fn read_workflow(&self, id: Uuid) -> Result<Workflow, StoreError> {
        let path = self.workflow_path(id);
        let content = match fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(StoreError::WorkflowNotFound(id));
            }
            Err(e) => return Err(StoreError::Storage(format!("read {path:?}: {e}"))),
        };
        serde_json::from_str(&content).map_err(|e| StoreError::Storage(format!("parse: {e}")))
    }

    async fn save_task(&self, task: &Task) -> Result<(), StoreError> {
        if let Some((old_path, old_status)) = self.find_task_path(task.id).await {
            if old_status != task.status {
                // Stale copy under the previous status directory.
                fs::remove_file(&old_path).await.ok();
            }
        }
        Self::write_json(&self.task_path(task.id, task.status), task).await
    }

    async fn read_tasks_in(&self, status: TaskStatus) -> Result<Vec<Task>, StoreError> {
        let dir = self.root.join("tasks").join(status.to_string());
        let mut tasks = Vec::new();
        let mut entries = fs::read_dir(&dir)
            .await
            .map_err(|e| StoreError::Storage(format!("read {dir:?}: {e}")))?;
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| StoreError::Storage(format!("read {dir:?}: {e}")))?
        {
            let path = entry.path();
            if path.extension().map_or(false, |ext| ext == "json") {
                match fs::read_to_string(&path).await {
                    Ok(content) => match serde_json::from_str::<Task>(&content) {
                        Ok(task) => tasks.push(task),
                        Err(e) => warn!("skipping unreadable task file {:?}: {}", path, e),
                    },
                    Err(e) => warn!("skipping unreadable task file {:?}: {}", path, e),
                }
            }
        }
        Ok(tasks)
    }

    async fn read_all_tasks(&self) -> Result<Vec<Task>, StoreError> {
        let mut all = Vec::new();
        for status in TASK_STATUSES {
            all.extend(self.read_tasks_in(status).await?);
        }
        Ok(all)
    }

    async fn read_all_workflows(&self) -> Result<Vec<Workflow>, StoreError> {
        let dir = self.root.join("workflows");
        let mut workflows = Vec::new();
        let mut entries = fs::read_dir(&dir)
            .await
            .map_err(|e| StoreError::Storage(format!("read {dir:?}: {e}")))?;
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| StoreError::Storage(format!("read {dir:?}: {e}")))?
        {
            let path = entry.path();
            if path.extension().map_or(false, |ext| ext == "json") {
                match fs::read_to_string(&path).await {
                    Ok(content) => match serde_json::from_str::<Workflow>(&content) {
                        Ok(wf) => workflows.push(wf),
                        Err(e) => warn!("skipping unreadable workflow file {:?}: {}", path, e),
                    },
                    Err(e) => warn!("skipping unreadable workflow file {:?}: {}", path, e),
                }
            }
        }
        Ok(workflows)
    }

    async fn hydrate(&self, mut workflow: Workflow) -> Result<Workflow, StoreError> {
        let mut tasks: Vec<Task> = self
            .read_all_tasks()
            .await?
            .into_iter()
            .filter(|t| t.workflow_id == workflow.id)
            .collect();
        // Creation order; ids as the deterministic tiebreak.
        tasks.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        workflow.tasks = tasks;
        Ok(workflow)
    }
}

#[async_trait]
impl StateStore for FileStore {
    async fn create_workflow(&self, workflow: &Workflow) -> Result<(), StoreError> {
        dag::validate(&workflow.tasks)?;

        let mut record = workflow.clone();
        let tasks = std::mem::take(&mut record.tasks);
        Self::write_json(&self.workflow_path(record.id), &record).await?;
        for task in &tasks {
            self.save_task(task).await?;
        }
        debug!("created workflow {} ({} tasks)", record.id, tasks.len());
        Ok(())
    }

    async fn get_workflow(&self, id: Uuid) -> Result<Workflow, StoreError> {
        let workflow = self.read_workflow(id).await?;
        self.hydrate(workflow).await
    }

    async fn list_workflows(&self, params: &ListParams) -> Result<WorkflowPage, StoreError> {
        let mut matching: Vec<Workflow> = self
            .read_all_workflows()
            .await?
            .into_iter()
            .filter(|wf| params.status.map_or(true, |s| wf.status == s))
            .collect();
        matching.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| a.id.cmp(&b.id)));

        let total = matching.len();
        let limit = params.effective_limit();
        let selected: Vec<Workflow> = matching
            .into_iter()
            .skip(params.offset())
            .take(limit)
            .collect();
        let mut workflows = Vec::with_capacity(selected.len());
        for wf in selected {
            workflows.push(self.hydrate(wf).await?);
        }

        Ok(WorkflowPage {
            workflows,
            total,
            page: params.page.max(1),
            limit,
        })
    }

    async fn get_active_workflows(&self) -> Result<Vec<Workflow>, StoreError> {
        let active: Vec<Workflow> = self
            .read_all_workflows()
            .await?
            .into_iter()
            .filter(|wf| matches!(wf.status, WorkflowStatus::Pending | WorkflowStatus::Running))
            .collect();
        let mut hydrated = Vec::with_capacity(active.len());
        for wf in active {
            hydrated.push(self.hydrate(wf).await?);
        }
        Ok(hydrated)
    }

    async fn update_workflow_status(
        &self,
        id: Uuid,
        status: WorkflowStatus,
    ) -> Result<(), StoreError> {
        let mut workflow = self.read_workflow(id).await?;
        apply_workflow_status(&mut workflow, status);
        Self::write_json(&self.workflow_path(id), &workflow).await
    }

    async fn create_task(&self, task: &Task) -> Result<(), StoreError> {
        self.read_workflow(task.workflow_id).await?;
        self.save_task(task).await
    }

    async fn get_task(&self, id: Uuid) -> Result<Task, StoreError> {
        let Some((path, _)) = self.find_task_path(id).await else {
            return Err(StoreError::TaskNotFound(id));
        };
        let content = fs::read_to_string(&path)
            .await
            .map_err(|e| StoreError::Storage(format!("read {path:?}: {e}")))?;
        serde_json::from_str(&content).map_err(|e| StoreError::Storage(format!("parse: {e}")))
    }

    async fn get_tasks_by_workflow(&self, workflow_id: Uuid) -> Result<Vec<Task>, StoreError> {
        let workflow = self.read_workflow(workflow_id).await?;
        Ok(self.hydrate(workflow).await?.tasks)
    }

    async fn update_task_status(
        &self,
        id: Uuid,
        status: TaskStatus,
        result: Option<Value>,
        error: Option<String>,
    ) -> Result<Task, StoreError> {
        let mut task = self.get_task(id).await?;
        if apply_task_status(&mut task, status, result, error) {
            self.save_task(&task).await?;
        }
        Ok(task)
    }

    async fn get_pending_tasks(&self) -> Result<Vec<Task>, StoreError> {
        let mut pending = self.read_tasks_in(TaskStatus::Pending).await?;
        pending.extend(self.read_tasks_in(TaskStatus::Retrying).await?);
        pending.sort_by(pending_order);
        Ok(pending)
    }

    async fn delete_workflow(&self, id: Uuid) -> Result<(), StoreError> {
        let workflow = self.get_workflow(id).await?;
        for task in &workflow.tasks {
            if let Some((path, _)) = self.find_task_path(task.id).await {
                fs::remove_file(&path).await.ok();
            }
        }
        fs::remove_file(self.workflow_path(id))
            .await
            .map_err(|e| StoreError::Storage(format!("delete workflow {id}: {e}")))
    }

    async fn workflow_counts(&self) -> Result<HashMap<WorkflowStatus, usize>, StoreError> {
        let mut counts = HashMap::new();
        for wf in self.read_all_workflows().await? {
            *counts.entry(wf.status).or_insert(0) += 1;
        }
        Ok(counts)
    }

    async fn task_counts(&self) -> Result<HashMap<TaskStatus, usize>, StoreError> {
        let mut counts = HashMap::new();
        for task in self.read_all_tasks().await? {
            *counts.entry(task.status).or_insert(0) += 1;
        }
        Ok(counts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    async fn store() -> (TempDir, FileStore) {
        let dir = TempDir::new().unwrap();
        let store = FileStore::new(dir.path()).await.unwrap();
        (dir, store)
    }

    fn sample_workflow() -> Workflow {
        let mut wf = Workflow::new("sample", "file-store sample");
        let a = Task::new(wf.id, "a", "etl", json!({"source": "s3://in"}));
        let b = Task::new(wf.id, "b", "etl", Value::Null).with_dependencies(vec!["a".into()]);
        wf.tasks = vec![a, b];
        wf
    }

    #[tokio::test]
    async fn workflow_roundtrips_with_tasks_in_order() {
        let (_dir, store) = store().await;
        let wf = sample_workflow();
        store.create_workflow(&wf).await.unwrap();

        let loaded = store.get_workflow(wf.id).await.unwrap();
        assert_eq!(loaded.name, "sample");
        assert_eq!(loaded.tasks.len(), 2);
        assert_eq!(loaded.tasks[0].name, "a");
        assert_eq!(loaded.tasks[0].payload["source"], "s3://in");
    }

    #[tokio::test]
    async fn status_change_moves_task_file() {
        let (_dir, store) = store().await;
        let wf = sample_workflow();
        let task_id = wf.tasks[0].id;
        store.create_workflow(&wf).await.unwrap();

        assert!(store.task_path(task_id, TaskStatus::Pending).exists());
        store
            .update_task_status(task_id, TaskStatus::Running, None, None)
            .await
            .unwrap();
        assert!(!store.task_path(task_id, TaskStatus::Pending).exists());
        assert!(store.task_path(task_id, TaskStatus::Running).exists());
    }

    #[tokio::test]
    async fn pending_scan_covers_pending_and_retrying() {
        let (_dir, store) = store().await;
        let wf = sample_workflow();
        let first = wf.tasks[0].id;
        store.create_workflow(&wf).await.unwrap();

        store
            .update_task_status(first, TaskStatus::Retrying, None, Some("transient".into()))
            .await
            .unwrap();
        let pending = store.get_pending_tasks().await.unwrap();
        assert_eq!(pending.len(), 2);
    }

    #[tokio::test]
    async fn missing_workflow_is_not_found() {
        let (_dir, store) = store().await;
        assert!(matches!(
            store.get_workflow(Uuid::new_v4()).await,
            Err(StoreError::WorkflowNotFound(_))
        ));
    }

    #[tokio::test]
    async fn delete_removes_workflow_and_task_files() {
        let (_dir, store) = store().await;
        let wf = sample_workflow();
        let task_id = wf.tasks[1].id;
        store.create_workflow(&wf).await.unwrap();

        store.delete_workflow(wf.id).await.unwrap();
        assert!(matches!(
            store.get_task(task_id).await,
            Err(StoreError::TaskNotFound(_))
        ));
    }
}
