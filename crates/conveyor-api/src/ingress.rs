//! Status ingress: the narrow seam workers report outcomes through.

use std::sync::Arc;

use tracing::{debug, info};

use conveyor_core::{StatusAck, StatusReport};
use conveyor_store::{StateStore, StoreError};

/// Applies worker status reports to the state store.
///
/// Idempotent by `(task_id, status)`: a repeated terminal report, or any
/// report arriving after the task settled, leaves the store untouched. The
/// returned ack always carries the authoritative status so workers can
/// detect duplicate deliveries.
pub struct StatusIngress {
    store: Arc<dyn StateStore>,
}

impl StatusIngress {
    pub fn new(store: Arc<dyn StateStore>) -> Self {
        Self { store }
    }

    /// Apply one report and return the store's resulting status.
    pub async fn apply(&self, report: StatusReport) -> Result<StatusAck, StoreError> {
        let current = self.store.get_task(report.task_id).await?;
        if current.status.is_terminal() {
            debug!(
                "task {} already {}, ignoring {} report",
                report.task_id, current.status, report.status
            );
            return Ok(StatusAck {
                status: current.status,
            });
        }

        let updated = self
            .store
            .update_task_status(report.task_id, report.status, report.result, report.error)
            .await?;
        info!("task {} -> {}", report.task_id, updated.status);
        Ok(StatusAck {
            status: updated.status,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use uuid::Uuid;

    use conveyor_core::{Task, TaskStatus, Workflow};
    use conveyor_store::MemoryStore;

    async fn seeded() -> (StatusIngress, Uuid) {
        let store = Arc::new(MemoryStore::new());
        let mut wf = Workflow::new("w", "");
        let task = Task::new(wf.id, "t", "generic", serde_json::Value::Null);
        let task_id = task.id;
        wf.tasks = vec![task];
        store.create_workflow(&wf).await.unwrap();
        (StatusIngress::new(store), task_id)
    }

    #[tokio::test]
    async fn applies_running_then_completed() {
        let (ingress, task_id) = seeded().await;

        let ack = ingress
            .apply(StatusReport::running(task_id))
            .await
            .unwrap();
        assert_eq!(ack.status, TaskStatus::Running);

        let ack = ingress
            .apply(StatusReport::completed(task_id, json!({"rows": 3})))
            .await
            .unwrap();
        assert_eq!(ack.status, TaskStatus::Completed);
    }

    #[tokio::test]
    async fn duplicate_terminal_report_is_a_noop() {
        let (ingress, task_id) = seeded().await;
        ingress
            .apply(StatusReport::completed(task_id, json!({"rows": 3})))
            .await
            .unwrap();

        // A second terminal report, and a conflicting one, change nothing.
        let ack = ingress
            .apply(StatusReport::completed(task_id, json!({"rows": 99})))
            .await
            .unwrap();
        assert_eq!(ack.status, TaskStatus::Completed);
        let ack = ingress
            .apply(StatusReport::failed(task_id, "too late"))
            .await
            .unwrap();
        assert_eq!(ack.status, TaskStatus::Completed);
    }

    #[tokio::test]
    async fn running_report_after_settlement_signals_duplicate() {
        let (ingress, task_id) = seeded().await;
        ingress
            .apply(StatusReport::completed(task_id, json!({})))
            .await
            .unwrap();

        let ack = ingress
            .apply(StatusReport::running(task_id))
            .await
            .unwrap();
        assert!(ack.status.is_terminal());
    }

    #[tokio::test]
    async fn unknown_task_is_an_error() {
        let (ingress, _) = seeded().await;
        assert!(ingress
            .apply(StatusReport::running(Uuid::new_v4()))
            .await
            .is_err());
    }
}
