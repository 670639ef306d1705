//! Health and metrics handlers.

use std::collections::BTreeMap;
use std::sync::Arc;

use axum::extract::State;
use axum::Json;
use chrono::Utc;
use serde::Serialize;

use conveyor_core::{TaskStatus, WorkflowStatus};
use conveyor_queue::QueueStats;

use crate::error::ApiError;
use crate::state::ApiState;

/// Health response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub uptime_seconds: u64,
    pub timestamp: String,
}

/// Counts grouped by status.
#[derive(Debug, Default, Serialize)]
pub struct StatusBreakdown {
    pub total: usize,
    #[serde(flatten)]
    pub by_status: BTreeMap<String, usize>,
}

/// Metrics response with live counters.
#[derive(Debug, Serialize)]
pub struct MetricsResponse {
    pub workflows: StatusBreakdown,
    pub tasks: StatusBreakdown,
    pub queues: BTreeMap<String, QueueStats>,
    pub workers: WorkerMetrics,
}

/// Worker registry metrics.
#[derive(Debug, Default, Serialize)]
pub struct WorkerMetrics {
    pub active: usize,
}

/// Health check.
///
/// GET /api/v1/health
pub async fn health(State(state): State<Arc<ApiState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        version: env!("CARGO_PKG_VERSION"),
        uptime_seconds: state.uptime_seconds(),
        timestamp: Utc::now().to_rfc3339(),
    })
}

/// Live counters from the state store, queue channels and worker registry.
///
/// GET /api/v1/metrics
pub async fn metrics(
    State(state): State<Arc<ApiState>>,
) -> Result<Json<MetricsResponse>, ApiError> {
    let workflow_counts = state.store.workflow_counts().await?;
    let task_counts = state.store.task_counts().await?;

    let mut workflows = StatusBreakdown::default();
    for status in [
        WorkflowStatus::Pending,
        WorkflowStatus::Running,
        WorkflowStatus::Completed,
        WorkflowStatus::Failed,
        WorkflowStatus::Cancelled,
    ] {
        let count = workflow_counts.get(&status).copied().unwrap_or(0);
        workflows.total += count;
        workflows.by_status.insert(status.to_string(), count);
    }

    let mut tasks = StatusBreakdown::default();
    for status in [
        TaskStatus::Pending,
        TaskStatus::Running,
        TaskStatus::Completed,
        TaskStatus::Failed,
        TaskStatus::Retrying,
        TaskStatus::Cancelled,
    ] {
        let count = task_counts.get(&status).copied().unwrap_or(0);
        tasks.total += count;
        tasks.by_status.insert(status.to_string(), count);
    }

    let mut queues = BTreeMap::new();
    // A worker serving several types counts once.
    let mut worker_ids = std::collections::HashSet::new();
    for task_type in state.queue.known_types().await? {
        queues.insert(task_type.clone(), state.queue.stats(&task_type).await?);
        for worker in state.queue.get_active_workers(&task_type).await? {
            worker_ids.insert(worker.id);
        }
    }

    Ok(Json(MetricsResponse {
        workflows,
        tasks,
        queues,
        workers: WorkerMetrics {
            active: worker_ids.len(),
        },
    }))
}
