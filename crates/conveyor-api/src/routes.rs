//! Route definitions.

use std::sync::Arc;

use axum::routing::{get, post, put};
use axum::Router;

use crate::handlers;
use crate::monitoring;
use crate::queue_routes;
use crate::state::ApiState;

/// Build the full router.
///
/// ```text
/// /api/v1
///   POST /workflows                    - submit a workflow
///   GET  /workflows                    - list workflows (page/limit/status)
///   GET  /workflows/{id}               - fetch a workflow with tasks
///   PUT  /workflows/{id}/cancel        - cancel a workflow
///   GET  /workflows/{id}/tasks         - tasks owned by a workflow
///   GET  /tasks/{id}                   - fetch one task
///   POST /tasks/{id}/status            - worker status ingress
///
///   POST /queue/{type}                 - enqueue an envelope
///   POST /queue/{type}/dequeue         - long-poll dequeue (204 on timeout)
///   POST /queue/ack                    - acknowledge a lease
///   POST /queue/nack                   - fail an attempt (retry/dead-letter)
///   POST /queue/{type}/process-retries - promote due retries
///   POST /queue/{type}/reap            - requeue orphaned leases
///   GET  /queue/{type}/stats           - channel lengths
///   GET  /queue/{type}/dead-letters    - dead-letter contents
///   GET  /queue/types                  - known task types
///
///   POST /workers                      - register a worker
///   PUT  /workers/{id}/heartbeat       - refresh a worker's lease
///   GET  /workers?type={type}          - active workers for a type
///
///   GET  /health                       - health check
///   GET  /metrics                      - live counters
/// ```
pub fn router(state: Arc<ApiState>) -> Router {
    let api = Router::new()
        .route("/workflows", post(handlers::create_workflow))
        .route("/workflows", get(handlers::list_workflows))
        .route("/workflows/{id}", get(handlers::get_workflow))
        .route("/workflows/{id}/cancel", put(handlers::cancel_workflow))
        .route("/workflows/{id}/tasks", get(handlers::get_workflow_tasks))
        .route("/tasks/{id}", get(handlers::get_task))
        .route("/tasks/{id}/status", post(handlers::report_task_status))
        .route("/queue/types", get(queue_routes::known_types))
        .route("/queue/ack", post(queue_routes::ack))
        .route("/queue/nack", post(queue_routes::nack))
        .route("/queue/{type}", post(queue_routes::enqueue))
        .route("/queue/{type}/dequeue", post(queue_routes::dequeue))
        .route(
            "/queue/{type}/process-retries",
            post(queue_routes::process_retries),
        )
        .route("/queue/{type}/reap", post(queue_routes::reap))
        .route("/queue/{type}/stats", get(queue_routes::stats))
        .route("/queue/{type}/dead-letters", get(queue_routes::dead_letters))
        .route("/workers", post(queue_routes::register_worker))
        .route("/workers", get(queue_routes::active_workers))
        .route("/workers/{id}/heartbeat", put(queue_routes::worker_heartbeat))
        .route("/health", get(monitoring::health))
        .route("/metrics", get(monitoring::metrics));

    Router::new().nest("/api/v1", api).with_state(state)
}
