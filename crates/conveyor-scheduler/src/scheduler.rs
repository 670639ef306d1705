//! The orchestrator's cooperating loops.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use conveyor_core::{dag, Task, TaskStatus, Workflow, WorkflowStatus};
use conveyor_queue::{QueueEnvelope, WorkQueue};
use conveyor_store::{ListParams, StateStore, WorkflowPage};

use crate::error::SchedulerError;

/// Loop intervals.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// DAG advancement tick.
    pub schedule_interval: Duration,
    /// Retry promotion tick.
    pub retry_interval: Duration,
    /// Completion monitor tick.
    pub monitor_interval: Duration,
    /// Lease reaper tick.
    pub reaper_interval: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            schedule_interval: Duration::from_secs(10),
            retry_interval: Duration::from_secs(60),
            monitor_interval: Duration::from_secs(300),
            reaper_interval: Duration::from_secs(60),
        }
    }
}

/// Drives workflows to terminal outcomes.
///
/// Four timer loops share the process: scheduling, retry promotion, the
/// completion monitor and the lease reaper. Loops log and skip per-item
/// errors; a failed tick is retried from scratch on the next interval.
pub struct Scheduler {
    store: Arc<dyn StateStore>,
    queue: Arc<dyn WorkQueue>,
    config: SchedulerConfig,
    /// Tasks currently inside the queue system (ready, processing or retry).
    /// Suppresses duplicate enqueues between ticks; ids leave the set once
    /// the store shows a terminal status. Lost on restart, which degrades to
    /// the documented at-least-once duplicate delivery.
    inflight: Mutex<HashSet<Uuid>>,
    shutdown: broadcast::Sender<()>,
}

impl Scheduler {
    /// Create a scheduler over a state store and work queue.
    pub fn new(
        store: Arc<dyn StateStore>,
        queue: Arc<dyn WorkQueue>,
        config: SchedulerConfig,
    ) -> Self {
        let (shutdown, _) = broadcast::channel(1);
        Self {
            store,
            queue,
            config,
            inflight: Mutex::new(HashSet::new()),
            shutdown,
        }
    }

    /// Spawn all four loops. Handles resolve after [`Scheduler::stop`].
    pub fn start(self: &Arc<Self>) -> Vec<JoinHandle<()>> {
        info!("starting scheduler loops");
        vec![
            self.spawn_loop("schedule", self.config.schedule_interval, |s| async move {
                s.schedule_pass().await
            }),
            self.spawn_loop("retry", self.config.retry_interval, |s| async move {
                s.retry_pass().await
            }),
            self.spawn_loop("monitor", self.config.monitor_interval, |s| async move {
                s.monitor_pass().await
            }),
            self.spawn_loop("reaper", self.config.reaper_interval, |s| async move {
                s.reaper_pass().await
            }),
        ]
    }

    /// Signal all loops to stop after their current tick.
    pub fn stop(&self) {
        info!("stopping scheduler loops");
        let _ = self.shutdown.send(());
    }

    fn spawn_loop<F, Fut>(
        self: &Arc<Self>,
        name: &'static str,
        interval: Duration,
        tick: F,
    ) -> JoinHandle<()>
    where
        F: Fn(Arc<Scheduler>) -> Fut + Send + 'static,
        Fut: std::future::Future<Output = Result<(), SchedulerError>> + Send + 'static,
    {
        let scheduler = Arc::clone(self);
        let mut shutdown_rx = self.shutdown.subscribe();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // The first tick of a tokio interval fires immediately; skip it
            // so the loop settles into its cadence after startup.
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = shutdown_rx.recv() => {
                        debug!("{name} loop stopped");
                        return;
                    }
                    _ = ticker.tick() => {
                        if let Err(e) = tick(Arc::clone(&scheduler)).await {
                            error!("{name} pass failed: {e}");
                        }
                    }
                }
            }
        })
    }

    /// Validate and persist a workflow. Tasks are not pre-enqueued; the next
    /// scheduling tick picks them up.
    pub async fn submit_workflow(&self, workflow: &Workflow) -> Result<(), SchedulerError> {
        dag::validate(&workflow.tasks)?;
        self.store.create_workflow(workflow).await?;
        info!(
            "submitted workflow {} ({}) with {} tasks",
            workflow.id,
            workflow.name,
            workflow.tasks.len()
        );
        Ok(())
    }

    /// Cancel a workflow: stop future enqueues and cascade to tasks that
    /// have not started. In-flight tasks keep their leases; their outcomes
    /// are accepted but never re-open the workflow.
    pub async fn cancel_workflow(&self, id: Uuid) -> Result<(), SchedulerError> {
        self.store
            .update_workflow_status(id, WorkflowStatus::Cancelled)
            .await?;
        for task in self.store.get_tasks_by_workflow(id).await? {
            if task.status.is_schedulable() {
                self.store
                    .update_task_status(task.id, TaskStatus::Cancelled, None, None)
                    .await?;
            }
        }
        info!("cancelled workflow {id}");
        Ok(())
    }

    /// One scheduling tick: fetch pending tasks, group per workflow, enqueue
    /// each ready task.
    pub async fn schedule_pass(&self) -> Result<(), SchedulerError> {
        let pending = self.store.get_pending_tasks().await?;
        self.prune_inflight().await;

        // Group while preserving the store's (priority, age) order.
        let mut order: Vec<Uuid> = Vec::new();
        let mut by_workflow: HashMap<Uuid, Vec<Task>> = HashMap::new();
        for task in pending {
            if !by_workflow.contains_key(&task.workflow_id) {
                order.push(task.workflow_id);
            }
            by_workflow.entry(task.workflow_id).or_default().push(task);
        }

        for workflow_id in order {
            let group = &by_workflow[&workflow_id];
            if let Err(e) = self.schedule_workflow_tasks(workflow_id, group).await {
                error!("failed to schedule tasks for workflow {workflow_id}: {e}");
            }
        }
        Ok(())
    }

    async fn schedule_workflow_tasks(
        &self,
        workflow_id: Uuid,
        group: &[Task],
    ) -> Result<(), SchedulerError> {
        let workflow = self.store.get_workflow(workflow_id).await?;
        if !matches!(
            workflow.status,
            WorkflowStatus::Pending | WorkflowStatus::Running
        ) {
            return Ok(());
        }

        let completed: HashSet<&str> = workflow
            .tasks
            .iter()
            .filter(|t| t.status == TaskStatus::Completed)
            .map(|t| t.name.as_str())
            .collect();

        let mut inflight = self.inflight.lock().await;
        let ready: Vec<&Task> = group
            .iter()
            .filter(|t| t.can_execute(&completed) && !inflight.contains(&t.id))
            .collect();
        if ready.is_empty() {
            return Ok(());
        }

        if workflow.status == WorkflowStatus::Pending {
            self.store
                .update_workflow_status(workflow_id, WorkflowStatus::Running)
                .await?;
        }

        let mut enqueued = 0usize;
        for task in ready {
            let envelope = QueueEnvelope::with_retry_policy(
                (*task).clone(),
                workflow.config.retry_policy.clone(),
            );
            match self.queue.enqueue(envelope).await {
                Ok(()) => {
                    inflight.insert(task.id);
                    enqueued += 1;
                }
                Err(e) => error!("failed to enqueue task {}: {e}", task.id),
            }
        }
        info!("scheduled {enqueued} tasks for workflow {workflow_id}");
        Ok(())
    }

    /// Drop inflight ids whose task reached a terminal status.
    async fn prune_inflight(&self) {
        let ids: Vec<Uuid> = {
            let inflight = self.inflight.lock().await;
            inflight.iter().copied().collect()
        };
        for id in ids {
            let done = match self.store.get_task(id).await {
                Ok(task) => task.status.is_terminal(),
                // A deleted workflow takes its tasks with it.
                Err(_) => true,
            };
            if done {
                self.inflight.lock().await.remove(&id);
            }
        }
    }

    /// One retry-promotion tick across every known task type.
    pub async fn retry_pass(&self) -> Result<(), SchedulerError> {
        for task_type in self.queue.known_types().await? {
            match self.queue.process_retries(&task_type).await {
                Ok(0) => {}
                Ok(promoted) => info!("promoted {promoted} retries for type {task_type}"),
                Err(e) => error!("failed to process retries for type {task_type}: {e}"),
            }
        }
        Ok(())
    }

    /// One completion-monitor tick: close workflows whose tasks have all
    /// reached an outcome.
    pub async fn monitor_pass(&self) -> Result<(), SchedulerError> {
        for workflow in self.store.get_active_workflows().await? {
            let Some(outcome) = dag::evaluate_outcome(&workflow.tasks) else {
                continue;
            };
            if outcome == workflow.status {
                continue;
            }
            info!("workflow {} -> {outcome}", workflow.id);
            if let Err(e) = self.store.update_workflow_status(workflow.id, outcome).await {
                error!("failed to close workflow {}: {e}", workflow.id);
            }
        }
        Ok(())
    }

    /// One reaper tick: redeliver leases held by vanished workers.
    pub async fn reaper_pass(&self) -> Result<(), SchedulerError> {
        for task_type in self.queue.known_types().await? {
            match self.queue.reap_orphaned(&task_type).await {
                Ok(reaped) if !reaped.is_empty() => {
                    warn!("requeued {} orphaned tasks of type {task_type}", reaped.len());
                }
                Ok(_) => {}
                Err(e) => error!("failed to reap type {task_type}: {e}"),
            }
        }
        Ok(())
    }

    /// Fetch a workflow with its tasks.
    pub async fn get_workflow(&self, id: Uuid) -> Result<Workflow, SchedulerError> {
        Ok(self.store.get_workflow(id).await?)
    }

    /// Fetch one task.
    pub async fn get_task(&self, id: Uuid) -> Result<Task, SchedulerError> {
        Ok(self.store.get_task(id).await?)
    }

    /// Tasks owned by a workflow.
    pub async fn get_workflow_tasks(&self, id: Uuid) -> Result<Vec<Task>, SchedulerError> {
        Ok(self.store.get_tasks_by_workflow(id).await?)
    }

    /// List workflows.
    pub async fn list_workflows(
        &self,
        params: &ListParams,
    ) -> Result<WorkflowPage, SchedulerError> {
        Ok(self.store.list_workflows(params).await?)
    }
}
