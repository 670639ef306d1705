//! YAML workflow definitions.
//!
//! A definition file declares a workflow, its configuration and its tasks,
//! with dependencies expressed as `depends_on` lists of task names. Parsing
//! produces a fully validated [`Workflow`]; dangling references and cycles
//! are rejected before anything is persisted.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::dag;
use crate::error::CoreError;
use crate::retry::RetryPolicy;
use crate::task::Task;
use crate::workflow::Workflow;

/// Top-level workflow definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowDefinition {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub config: ConfigDefinition,
    pub tasks: Vec<TaskDefinition>,
}

/// Optional workflow configuration overrides.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConfigDefinition {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_concurrency: Option<u32>,
    /// Duration string, e.g. `"2h"`.
    #[serde(default, with = "humantime_serde", skip_serializing_if = "Option::is_none")]
    pub timeout: Option<Duration>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_policy: Option<RetryPolicyDefinition>,
}

/// Optional retry policy overrides.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RetryPolicyDefinition {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_attempts: Option<u32>,
    #[serde(default, with = "humantime_serde", skip_serializing_if = "Option::is_none")]
    pub initial_delay: Option<Duration>,
    #[serde(default, with = "humantime_serde", skip_serializing_if = "Option::is_none")]
    pub max_delay: Option<Duration>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backoff_factor: Option<f64>,
}

/// One task declaration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskDefinition {
    pub name: String,
    #[serde(rename = "type")]
    pub task_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_retries: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<i32>,
    #[serde(default, rename = "depends_on", skip_serializing_if = "Vec::is_empty")]
    pub dependencies: Vec<String>,
}

impl WorkflowDefinition {
    /// Parse a definition from YAML text.
    pub fn parse_str(input: &str) -> Result<Self, CoreError> {
        serde_yaml::from_str(input).map_err(|e| CoreError::InvalidDefinition(e.to_string()))
    }

    /// Load a definition from a YAML file.
    pub fn load_file(path: impl AsRef<Path>) -> Result<Self, CoreError> {
        let text = std::fs::read_to_string(path.as_ref())
            .map_err(|e| CoreError::InvalidDefinition(e.to_string()))?;
        Self::parse_str(&text)
    }

    /// Build and validate the workflow model this definition describes.
    pub fn into_workflow(self) -> Result<Workflow, CoreError> {
        if self.name.is_empty() {
            return Err(CoreError::EmptyWorkflowName);
        }

        let mut workflow = Workflow::new(self.name, self.description);

        if let Some(max_concurrency) = self.config.max_concurrency {
            workflow.config.max_concurrency = max_concurrency;
        }
        if let Some(timeout) = self.config.timeout {
            workflow.config.timeout = timeout;
        }
        if let Some(retry) = self.config.retry_policy {
            apply_retry_overrides(&mut workflow.config.retry_policy, retry);
        }

        for def in self.tasks {
            let mut task = Task::new(
                workflow.id,
                def.name,
                def.task_type,
                def.payload.unwrap_or(Value::Null),
            )
            .with_dependencies(def.dependencies);
            if let Some(max_retries) = def.max_retries {
                task.max_retries = max_retries;
            }
            if let Some(priority) = def.priority {
                task.priority = priority;
            }
            workflow.tasks.push(task);
        }

        dag::validate(&workflow.tasks)?;
        Ok(workflow)
    }
}

fn apply_retry_overrides(policy: &mut RetryPolicy, def: RetryPolicyDefinition) {
    if let Some(max_attempts) = def.max_attempts {
        policy.max_attempts = max_attempts;
    }
    if let Some(initial_delay) = def.initial_delay {
        policy.initial_delay = initial_delay;
    }
    if let Some(max_delay) = def.max_delay {
        policy.max_delay = max_delay;
    }
    if let Some(backoff_factor) = def.backoff_factor {
        policy.backoff_factor = backoff_factor;
    }
}

/// Parse YAML text straight into a validated workflow.
pub fn parse_workflow(input: &str) -> Result<Workflow, CoreError> {
    WorkflowDefinition::parse_str(input)?.into_workflow()
}
