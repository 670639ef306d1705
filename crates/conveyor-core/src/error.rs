//! Model and definition errors.

use thiserror::Error;

/// Validation and definition error types.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Workflow name is missing.
    #[error("workflow name must not be empty")]
    EmptyWorkflowName,

    /// Task name is missing.
    #[error("task name must not be empty")]
    EmptyTaskName,

    /// Task type is missing.
    #[error("task '{0}' has no type")]
    EmptyTaskType(String),

    /// Two tasks in the same workflow share a name.
    #[error("duplicate task name '{0}' in workflow")]
    DuplicateTaskName(String),

    /// A dependency references a task name that does not exist.
    #[error("task '{task}' depends on unknown task '{dependency}'")]
    UnknownDependency { task: String, dependency: String },

    /// The dependency graph contains a cycle.
    #[error("dependency cycle detected through task '{0}'")]
    DependencyCycle(String),

    /// A definition file could not be parsed.
    #[error("invalid workflow definition: {0}")]
    InvalidDefinition(String),
}
