//! Dependency-graph validation and readiness computation.
//!
//! Dependencies are stored by task *name* (workflow-local identifier), not
//! id, so definitions stay round-trippable and persistence order stays
//! decoupled from authoring. Everything here is pure over a task slice.

use std::collections::{HashMap, HashSet};

use crate::error::CoreError;
use crate::task::{Task, TaskStatus};
use crate::workflow::WorkflowStatus;

/// Validate a workflow's task set.
///
/// Rejects empty names and types, duplicate task names, dependencies on
/// unknown names, and dependency cycles. Run once at submission; no state
/// that violates these rules is ever written.
pub fn validate(tasks: &[Task]) -> Result<(), CoreError> {
    let mut names: HashSet<&str> = HashSet::with_capacity(tasks.len());
    for task in tasks {
        if task.name.is_empty() {
            return Err(CoreError::EmptyTaskName);
        }
        if task.task_type.is_empty() {
            return Err(CoreError::EmptyTaskType(task.name.clone()));
        }
        if !names.insert(task.name.as_str()) {
            return Err(CoreError::DuplicateTaskName(task.name.clone()));
        }
    }

    for task in tasks {
        for dep in &task.dependencies {
            if !names.contains(dep.as_str()) {
                return Err(CoreError::UnknownDependency {
                    task: task.name.clone(),
                    dependency: dep.clone(),
                });
            }
        }
    }

    detect_cycle(tasks)
}

/// DFS colour for cycle detection.
#[derive(Clone, Copy, PartialEq)]
enum Colour {
    Unvisited,
    Active,
    Done,
}

/// Three-colouring DFS over the name-keyed dependency map.
fn detect_cycle(tasks: &[Task]) -> Result<(), CoreError> {
    let deps: HashMap<&str, &[String]> = tasks
        .iter()
        .map(|t| (t.name.as_str(), t.dependencies.as_slice()))
        .collect();
    let mut colours: HashMap<&str, Colour> =
        tasks.iter().map(|t| (t.name.as_str(), Colour::Unvisited)).collect();

    fn visit<'a>(
        name: &'a str,
        deps: &HashMap<&'a str, &'a [String]>,
        colours: &mut HashMap<&'a str, Colour>,
    ) -> Result<(), CoreError> {
        colours.insert(name, Colour::Active);
        if let Some(edges) = deps.get(name) {
            for dep in edges.iter() {
                match colours.get(dep.as_str()).copied() {
                    Some(Colour::Active) => {
                        return Err(CoreError::DependencyCycle(dep.clone()));
                    }
                    Some(Colour::Unvisited) => visit(dep.as_str(), deps, colours)?,
                    _ => {}
                }
            }
        }
        colours.insert(name, Colour::Done);
        Ok(())
    }

    for task in tasks {
        if colours.get(task.name.as_str()).copied() == Some(Colour::Unvisited) {
            visit(task.name.as_str(), &deps, &mut colours)?;
        }
    }
    Ok(())
}

/// Tasks eligible for scheduling: status pending or retrying, with every
/// dependency completed. Input order is preserved.
pub fn ready_set(tasks: &[Task]) -> Vec<&Task> {
    let completed: HashSet<&str> = tasks
        .iter()
        .filter(|t| t.status == TaskStatus::Completed)
        .map(|t| t.name.as_str())
        .collect();

    tasks.iter().filter(|t| t.can_execute(&completed)).collect()
}

/// Decide whether a workflow has reached a terminal outcome.
///
/// - `Completed` iff every task completed (a workflow with zero tasks
///   completes immediately).
/// - `Failed` iff at least one task failed, no task is running, and every
///   remaining pending/retrying task is unreachable — its dependency closure
///   contains a failed or cancelled task.
/// - `None` while any task is running or still reachable.
pub fn evaluate_outcome(tasks: &[Task]) -> Option<WorkflowStatus> {
    if tasks.iter().all(|t| t.status == TaskStatus::Completed) {
        return Some(WorkflowStatus::Completed);
    }
    if tasks.iter().any(|t| t.status == TaskStatus::Running) {
        return None;
    }
    if !tasks.iter().any(|t| t.status == TaskStatus::Failed) {
        return None;
    }

    let doomed = doomed_names(tasks);
    let all_remaining_unreachable = tasks
        .iter()
        .filter(|t| t.status.is_schedulable())
        .all(|t| doomed.contains(t.name.as_str()));

    if all_remaining_unreachable {
        Some(WorkflowStatus::Failed)
    } else {
        None
    }
}

/// Names whose dependency closure contains a failed or cancelled task,
/// including those tasks themselves. Fixpoint over the dependency edges.
fn doomed_names(tasks: &[Task]) -> HashSet<&str> {
    let mut doomed: HashSet<&str> = tasks
        .iter()
        .filter(|t| matches!(t.status, TaskStatus::Failed | TaskStatus::Cancelled))
        .map(|t| t.name.as_str())
        .collect();

    loop {
        let mut grew = false;
        for task in tasks {
            if doomed.contains(task.name.as_str()) {
                continue;
            }
            if task.dependencies.iter().any(|d| doomed.contains(d.as_str())) {
                doomed.insert(task.name.as_str());
                grew = true;
            }
        }
        if !grew {
            return doomed;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;
    use uuid::Uuid;

    fn task(name: &str, deps: &[&str]) -> Task {
        Task::new(Uuid::new_v4(), name, "generic", Value::Null)
            .with_dependencies(deps.iter().map(|s| s.to_string()).collect())
    }

    fn with_status(mut t: Task, status: TaskStatus) -> Task {
        t.status = status;
        t
    }

    #[test]
    fn validate_accepts_linear_chain() {
        let tasks = vec![task("a", &[]), task("b", &["a"]), task("c", &["b"])];
        assert!(validate(&tasks).is_ok());
    }

    #[test]
    fn validate_rejects_unknown_dependency() {
        let tasks = vec![task("a", &["ghost"])];
        let err = validate(&tasks).unwrap_err();
        assert!(matches!(err, CoreError::UnknownDependency { .. }));
    }

    #[test]
    fn validate_rejects_duplicate_names() {
        let tasks = vec![task("a", &[]), task("a", &[])];
        assert!(matches!(
            validate(&tasks).unwrap_err(),
            CoreError::DuplicateTaskName(_)
        ));
    }

    #[test]
    fn validate_rejects_two_node_cycle() {
        let tasks = vec![task("a", &["b"]), task("b", &["a"])];
        assert!(matches!(
            validate(&tasks).unwrap_err(),
            CoreError::DependencyCycle(_)
        ));
    }

    #[test]
    fn validate_rejects_self_dependency() {
        let tasks = vec![task("a", &["a"])];
        assert!(matches!(
            validate(&tasks).unwrap_err(),
            CoreError::DependencyCycle(_)
        ));
    }

    #[test]
    fn validate_rejects_long_cycle_behind_valid_prefix() {
        let tasks = vec![
            task("root", &[]),
            task("a", &["root", "c"]),
            task("b", &["a"]),
            task("c", &["b"]),
        ];
        assert!(matches!(
            validate(&tasks).unwrap_err(),
            CoreError::DependencyCycle(_)
        ));
    }

    #[test]
    fn ready_set_returns_roots_first_tick() {
        let tasks = vec![task("a", &[]), task("b", &["a"])];
        let ready = ready_set(&tasks);
        assert_eq!(ready.len(), 1);
        assert_eq!(ready[0].name, "a");
    }

    #[test]
    fn ready_set_unblocks_after_dependency_completes() {
        let tasks = vec![
            with_status(task("a", &[]), TaskStatus::Completed),
            task("b", &["a"]),
            task("c", &["b"]),
        ];
        let ready = ready_set(&tasks);
        assert_eq!(ready.len(), 1);
        assert_eq!(ready[0].name, "b");
    }

    #[test]
    fn ready_set_includes_retrying_tasks() {
        let tasks = vec![with_status(task("a", &[]), TaskStatus::Retrying)];
        assert_eq!(ready_set(&tasks).len(), 1);
    }

    #[test]
    fn empty_workflow_evaluates_completed() {
        assert_eq!(evaluate_outcome(&[]), Some(WorkflowStatus::Completed));
    }

    #[test]
    fn all_completed_evaluates_completed() {
        let tasks = vec![
            with_status(task("a", &[]), TaskStatus::Completed),
            with_status(task("b", &["a"]), TaskStatus::Completed),
        ];
        assert_eq!(evaluate_outcome(&tasks), Some(WorkflowStatus::Completed));
    }

    #[test]
    fn failure_with_doomed_descendants_evaluates_failed() {
        let tasks = vec![
            with_status(task("a", &[]), TaskStatus::Failed),
            task("b", &["a"]),
            task("c", &["b"]),
        ];
        assert_eq!(evaluate_outcome(&tasks), Some(WorkflowStatus::Failed));
    }

    #[test]
    fn failure_with_runnable_sibling_is_not_terminal_yet() {
        // "b" does not depend on the failed task, so it can still run.
        let tasks = vec![
            with_status(task("a", &[]), TaskStatus::Failed),
            task("b", &[]),
        ];
        assert_eq!(evaluate_outcome(&tasks), None);
    }

    #[test]
    fn running_task_defers_failure_decision() {
        let tasks = vec![
            with_status(task("a", &[]), TaskStatus::Failed),
            with_status(task("b", &[]), TaskStatus::Running),
        ];
        assert_eq!(evaluate_outcome(&tasks), None);
    }

    #[test]
    fn failed_and_completed_mix_evaluates_failed() {
        let tasks = vec![
            with_status(task("a", &[]), TaskStatus::Completed),
            with_status(task("b", &["a"]), TaskStatus::Failed),
        ];
        assert_eq!(evaluate_outcome(&tasks), Some(WorkflowStatus::Failed));
    }

    #[test]
    fn retrying_task_keeps_workflow_alive() {
        let tasks = vec![
            with_status(task("a", &[]), TaskStatus::Failed),
            with_status(task("b", &[]), TaskStatus::Retrying),
        ];
        assert_eq!(evaluate_outcome(&tasks), None);
    }
}
