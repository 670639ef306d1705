//! Pluggable task bodies.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use conveyor_core::Task;

use crate::error::WorkerError;

/// A task body. The core is indifferent to what a task *does*; it only
/// observes the returned result or error.
#[async_trait]
pub trait TaskExecutor: Send + Sync {
    /// Execute the task and produce its result value.
    async fn execute(&self, task: &Task) -> Result<Value, WorkerError>;
}

/// Maps task types to their executors. Built once at worker startup.
#[derive(Default)]
pub struct ExecutorRegistry {
    executors: HashMap<String, Arc<dyn TaskExecutor>>,
}

impl ExecutorRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an executor for a task type.
    pub fn register(
        mut self,
        task_type: impl Into<String>,
        executor: Arc<dyn TaskExecutor>,
    ) -> Self {
        self.executors.insert(task_type.into(), executor);
        self
    }

    /// Look up the executor for a task type.
    pub fn get(&self, task_type: &str) -> Option<Arc<dyn TaskExecutor>> {
        self.executors.get(task_type).cloned()
    }

    /// Registered task types.
    pub fn task_types(&self) -> Vec<String> {
        self.executors.keys().cloned().collect()
    }
}

/// Trivial executor that echoes the payload back as the result. Useful for
/// wiring checks and as a stand-in body for generic tasks.
pub struct EchoExecutor;

#[async_trait]
impl TaskExecutor for EchoExecutor {
    async fn execute(&self, task: &Task) -> Result<Value, WorkerError> {
        Ok(json!({ "echo": task.payload }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[tokio::test]
    async fn registry_resolves_by_type() {
        let registry = ExecutorRegistry::new().register("generic", Arc::new(EchoExecutor));
        assert!(registry.get("generic").is_some());
        assert!(registry.get("etl").is_none());
    }

    #[tokio::test]
    async fn echo_executor_reflects_payload() {
        let task = Task::new(Uuid::new_v4(), "t", "generic", json!({"n": 7}));
        let result = EchoExecutor.execute(&task).await.unwrap();
        assert_eq!(result["echo"]["n"], 7);
    }
}
