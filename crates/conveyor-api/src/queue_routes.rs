//! Queue and worker-registry endpoints.
//!
//! These are the orchestrator side of the distribution seam: remote workers
//! drive them through the queue's HTTP client. The blocking dequeue is a
//! long-poll that answers 204 on timeout.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use tracing::debug;
use uuid::Uuid;

use conveyor_core::{WorkerInfo, WorkerStatus};
use conveyor_queue::http::{
    DeadLettersResponse, DequeueRequest, KnownTypesResponse, PromotedResponse,
    RegisterWorkerRequest, ReapedResponse,
};
use conveyor_queue::{NackDisposition, QueueEnvelope, QueueStats};

use crate::error::ApiError;
use crate::state::ApiState;

/// Longest long-poll window the server will hold a dequeue open.
const MAX_DEQUEUE_WINDOW: Duration = Duration::from_secs(60);

/// Enqueue an envelope.
///
/// POST /api/v1/queue/{type}
pub async fn enqueue(
    State(state): State<Arc<ApiState>>,
    Path(task_type): Path<String>,
    Json(envelope): Json<QueueEnvelope>,
) -> Result<StatusCode, ApiError> {
    if envelope.task.task_type != task_type {
        return Err(ApiError::BadRequest(format!(
            "envelope is for type '{}', not '{task_type}'",
            envelope.task.task_type
        )));
    }
    state.queue.enqueue(envelope).await?;
    Ok(StatusCode::ACCEPTED)
}

/// Long-poll dequeue. 200 with an envelope, or 204 on timeout.
///
/// POST /api/v1/queue/{type}/dequeue
pub async fn dequeue(
    State(state): State<Arc<ApiState>>,
    Path(task_type): Path<String>,
    Json(request): Json<DequeueRequest>,
) -> Result<Response, ApiError> {
    let timeout = Duration::from_secs(request.timeout_secs).min(MAX_DEQUEUE_WINDOW);
    debug!(
        "worker {} polling {task_type} for up to {:?}",
        request.worker_id, timeout
    );
    match state
        .queue
        .dequeue(&task_type, request.worker_id, timeout)
        .await?
    {
        Some(envelope) => Ok(Json(envelope).into_response()),
        None => Ok(StatusCode::NO_CONTENT.into_response()),
    }
}

/// Acknowledge a finished lease.
///
/// POST /api/v1/queue/ack
pub async fn ack(
    State(state): State<Arc<ApiState>>,
    Json(envelope): Json<QueueEnvelope>,
) -> Result<StatusCode, ApiError> {
    state.queue.ack(&envelope).await?;
    Ok(StatusCode::OK)
}

/// Negative-acknowledge a failed attempt.
///
/// POST /api/v1/queue/nack
pub async fn nack(
    State(state): State<Arc<ApiState>>,
    Json(envelope): Json<QueueEnvelope>,
) -> Result<Json<NackDisposition>, ApiError> {
    Ok(Json(state.queue.nack(&envelope).await?))
}

/// Promote due retries.
///
/// POST /api/v1/queue/{type}/process-retries
pub async fn process_retries(
    State(state): State<Arc<ApiState>>,
    Path(task_type): Path<String>,
) -> Result<Json<PromotedResponse>, ApiError> {
    let promoted = state.queue.process_retries(&task_type).await?;
    Ok(Json(PromotedResponse { promoted }))
}

/// Requeue leases whose worker vanished.
///
/// POST /api/v1/queue/{type}/reap
pub async fn reap(
    State(state): State<Arc<ApiState>>,
    Path(task_type): Path<String>,
) -> Result<Json<ReapedResponse>, ApiError> {
    let reaped = state.queue.reap_orphaned(&task_type).await?;
    Ok(Json(ReapedResponse { reaped }))
}

/// Channel lengths for one type.
///
/// GET /api/v1/queue/{type}/stats
pub async fn stats(
    State(state): State<Arc<ApiState>>,
    Path(task_type): Path<String>,
) -> Result<Json<QueueStats>, ApiError> {
    Ok(Json(state.queue.stats(&task_type).await?))
}

/// Dead-letter contents for inspection.
///
/// GET /api/v1/queue/{type}/dead-letters
pub async fn dead_letters(
    State(state): State<Arc<ApiState>>,
    Path(task_type): Path<String>,
) -> Result<Json<DeadLettersResponse>, ApiError> {
    let dead_letters = state.queue.dead_letters(&task_type).await?;
    Ok(Json(DeadLettersResponse { dead_letters }))
}

/// Every task type with a channel.
///
/// GET /api/v1/queue/types
pub async fn known_types(
    State(state): State<Arc<ApiState>>,
) -> Result<Json<KnownTypesResponse>, ApiError> {
    let types = state.queue.known_types().await?;
    Ok(Json(KnownTypesResponse { types }))
}

/// Register a worker.
///
/// POST /api/v1/workers
pub async fn register_worker(
    State(state): State<Arc<ApiState>>,
    Json(request): Json<RegisterWorkerRequest>,
) -> Result<StatusCode, ApiError> {
    let mut info = WorkerInfo::new(request.id, request.address, request.task_types);
    info.status = WorkerStatus::Active;
    state.queue.register_worker(info).await?;
    Ok(StatusCode::CREATED)
}

/// Refresh a worker's lease.
///
/// PUT /api/v1/workers/{id}/heartbeat
pub async fn worker_heartbeat(
    State(state): State<Arc<ApiState>>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    state.queue.update_heartbeat(id).await?;
    Ok(StatusCode::OK)
}

/// Query string for the active-worker listing.
#[derive(Debug, Deserialize)]
pub struct WorkersQuery {
    #[serde(rename = "type")]
    pub task_type: String,
}

/// Active workers for a type.
///
/// GET /api/v1/workers?type={type}
pub async fn active_workers(
    State(state): State<Arc<ApiState>>,
    Query(query): Query<WorkersQuery>,
) -> Result<Json<Vec<WorkerInfo>>, ApiError> {
    Ok(Json(state.queue.get_active_workers(&query.task_type).await?))
}
