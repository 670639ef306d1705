//! Workflow and task route handlers.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::info;
use uuid::Uuid;

use conveyor_core::{StatusReport, Task, Workflow, WorkflowConfig, WorkflowStatus};
use conveyor_store::ListParams;

use crate::error::ApiError;
use crate::state::ApiState;

/// Body for `POST /api/v1/workflows`.
#[derive(Debug, Clone, Deserialize)]
pub struct CreateWorkflowRequest {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub config: Option<WorkflowConfig>,
    pub tasks: Vec<CreateTaskRequest>,
}

/// One task in a submission.
#[derive(Debug, Clone, Deserialize)]
pub struct CreateTaskRequest {
    pub name: String,
    #[serde(rename = "type")]
    pub task_type: String,
    #[serde(default)]
    pub payload: Option<Value>,
    #[serde(default)]
    pub max_retries: Option<u32>,
    #[serde(default)]
    pub priority: Option<i32>,
    #[serde(default)]
    pub dependencies: Option<Vec<String>>,
}

impl CreateWorkflowRequest {
    /// Build the workflow model this request describes. DAG validation
    /// happens at submission.
    pub fn into_workflow(self) -> Result<Workflow, ApiError> {
        if self.name.is_empty() {
            return Err(ApiError::BadRequest("workflow name is required".into()));
        }

        let mut workflow = Workflow::new(self.name, self.description);
        if let Some(config) = self.config {
            workflow.config = config;
        }
        for req in self.tasks {
            let mut task = Task::new(
                workflow.id,
                req.name,
                req.task_type,
                req.payload.unwrap_or(Value::Null),
            );
            if let Some(max_retries) = req.max_retries {
                task.max_retries = max_retries;
            }
            if let Some(priority) = req.priority {
                task.priority = priority;
            }
            if let Some(dependencies) = req.dependencies {
                task.dependencies = dependencies;
            }
            workflow.tasks.push(task);
        }
        Ok(workflow)
    }
}

/// Query string for `GET /api/v1/workflows`.
#[derive(Debug, Default, Deserialize)]
pub struct ListQuery {
    #[serde(default)]
    pub page: Option<usize>,
    #[serde(default)]
    pub limit: Option<usize>,
    #[serde(default)]
    pub status: Option<String>,
}

/// Response for workflow listings.
#[derive(Debug, Serialize)]
pub struct ListWorkflowsResponse {
    pub workflows: Vec<Workflow>,
    pub total: usize,
    pub page: usize,
    pub limit: usize,
}

/// Create a workflow.
///
/// POST /api/v1/workflows
pub async fn create_workflow(
    State(state): State<Arc<ApiState>>,
    Json(request): Json<CreateWorkflowRequest>,
) -> Result<(StatusCode, Json<Workflow>), ApiError> {
    let workflow = request.into_workflow()?;
    info!("submitting workflow {} ({})", workflow.id, workflow.name);
    state.scheduler.submit_workflow(&workflow).await?;
    Ok((StatusCode::CREATED, Json(workflow)))
}

/// Fetch a workflow with its tasks.
///
/// GET /api/v1/workflows/{id}
pub async fn get_workflow(
    State(state): State<Arc<ApiState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<Workflow>, ApiError> {
    Ok(Json(state.scheduler.get_workflow(id).await?))
}

/// List workflows, newest first.
///
/// GET /api/v1/workflows
pub async fn list_workflows(
    State(state): State<Arc<ApiState>>,
    Query(query): Query<ListQuery>,
) -> Result<Json<ListWorkflowsResponse>, ApiError> {
    let status = match query.status.as_deref() {
        None | Some("") => None,
        Some(raw) => Some(
            serde_json::from_value::<WorkflowStatus>(Value::String(raw.to_string()))
                .map_err(|_| ApiError::BadRequest(format!("unknown status '{raw}'")))?,
        ),
    };
    let params = ListParams {
        status,
        page: query.page.unwrap_or(1),
        limit: query.limit.unwrap_or(20),
    };

    let page = state.scheduler.list_workflows(&params).await?;
    Ok(Json(ListWorkflowsResponse {
        workflows: page.workflows,
        total: page.total,
        page: page.page,
        limit: page.limit,
    }))
}

/// Cancel a workflow.
///
/// PUT /api/v1/workflows/{id}/cancel
pub async fn cancel_workflow(
    State(state): State<Arc<ApiState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<Value>, ApiError> {
    state.scheduler.cancel_workflow(id).await?;
    Ok(Json(json!({ "message": "Workflow cancelled" })))
}

/// Fetch one task.
///
/// GET /api/v1/tasks/{id}
pub async fn get_task(
    State(state): State<Arc<ApiState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<Task>, ApiError> {
    Ok(Json(state.scheduler.get_task(id).await?))
}

/// Tasks owned by a workflow.
///
/// GET /api/v1/workflows/{id}/tasks
pub async fn get_workflow_tasks(
    State(state): State<Arc<ApiState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<Value>, ApiError> {
    let tasks = state.scheduler.get_workflow_tasks(id).await?;
    Ok(Json(json!({ "tasks": tasks })))
}

/// Worker status callback.
///
/// POST /api/v1/tasks/{id}/status
pub async fn report_task_status(
    State(state): State<Arc<ApiState>>,
    Path(id): Path<Uuid>,
    Json(mut report): Json<StatusReport>,
) -> Result<Json<conveyor_core::StatusAck>, ApiError> {
    if report.task_id != id {
        return Err(ApiError::BadRequest(format!(
            "body task_id {} does not match path id {id}",
            report.task_id
        )));
    }
    report.task_id = id;
    Ok(Json(state.ingress.apply(report).await?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_builds_workflow_with_overrides() {
        let request = CreateWorkflowRequest {
            name: "nightly".into(),
            description: "batch".into(),
            config: None,
            tasks: vec![
                CreateTaskRequest {
                    name: "a".into(),
                    task_type: "etl".into(),
                    payload: Some(json!({"in": "s3://x"})),
                    max_retries: Some(5),
                    priority: Some(7),
                    dependencies: None,
                },
                CreateTaskRequest {
                    name: "b".into(),
                    task_type: "etl".into(),
                    payload: None,
                    max_retries: None,
                    priority: None,
                    dependencies: Some(vec!["a".into()]),
                },
            ],
        };

        let workflow = request.into_workflow().unwrap();
        assert_eq!(workflow.tasks.len(), 2);
        assert_eq!(workflow.tasks[0].max_retries, 5);
        assert_eq!(workflow.tasks[0].priority, 7);
        assert_eq!(workflow.tasks[1].dependencies, vec!["a".to_string()]);
        assert_eq!(workflow.tasks[1].workflow_id, workflow.id);
    }

    #[test]
    fn empty_name_is_rejected() {
        let request = CreateWorkflowRequest {
            name: String::new(),
            description: String::new(),
            config: None,
            tasks: vec![],
        };
        assert!(request.into_workflow().is_err());
    }

    #[test]
    fn create_request_parses_from_json() {
        let body = json!({
            "name": "wf",
            "tasks": [
                {"name": "t", "type": "generic", "payload": {"k": 1}, "dependencies": []}
            ]
        });
        let request: CreateWorkflowRequest = serde_json::from_value(body).unwrap();
        assert_eq!(request.tasks[0].task_type, "generic");
    }
}
