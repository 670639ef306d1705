//! The worker's lifecycle: register, heartbeat, dequeue, execute, report.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use conveyor_core::{StatusReport, WorkerInfo};
use conveyor_queue::{NackDisposition, QueueEnvelope, WorkQueue};

use crate::error::WorkerError;
use crate::executor::ExecutorRegistry;
use crate::reporter::StatusReporter;

/// Worker runtime tunables.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Heartbeat refresh cadence.
    pub heartbeat_interval: Duration,
    /// Blocking-dequeue window; keeps loops responsive to shutdown.
    pub dequeue_timeout: Duration,
    /// Pause after a queue error before retrying the dequeue.
    pub error_backoff: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval: Duration::from_secs(60),
            dequeue_timeout: Duration::from_secs(30),
            error_backoff: Duration::from_secs(5),
        }
    }
}

/// A worker process serving one or more task types.
///
/// On start it registers with the queue's worker registry, spawns a
/// heartbeat loop, and runs one dequeue loop per served type. Each dequeued
/// task flows through the execution protocol:
///
/// 1. report `running` (and skip the body if the ingress says the task
///    already reached a terminal outcome elsewhere),
/// 2. execute,
/// 3. on success ack and report `completed`,
/// 4. on failure nack and report `retrying` or `failed` to match where the
///    queue routed the attempt.
pub struct WorkerRuntime {
    id: Uuid,
    address: String,
    queue: Arc<dyn WorkQueue>,
    reporter: Arc<dyn StatusReporter>,
    executors: ExecutorRegistry,
    config: WorkerConfig,
    shutdown: broadcast::Sender<()>,
}

impl WorkerRuntime {
    /// Create a worker runtime. Served task types come from the registry.
    pub fn new(
        address: impl Into<String>,
        queue: Arc<dyn WorkQueue>,
        reporter: Arc<dyn StatusReporter>,
        executors: ExecutorRegistry,
        config: WorkerConfig,
    ) -> Self {
        let (shutdown, _) = broadcast::channel(1);
        Self {
            id: Uuid::new_v4(),
            address: address.into(),
            queue,
            reporter,
            executors,
            config,
            shutdown,
        }
    }

    /// This worker's registry id.
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Register and spawn the heartbeat and per-type dequeue loops.
    pub async fn start(self: &Arc<Self>) -> Result<Vec<JoinHandle<()>>, WorkerError> {
        let task_types = self.executors.task_types();
        info!(
            "starting worker {} on {} for task types {:?}",
            self.id, self.address, task_types
        );
        self.queue
            .register_worker(WorkerInfo::new(self.id, self.address.clone(), task_types.clone()))
            .await?;

        let mut handles = vec![self.spawn_heartbeat_loop()];
        for task_type in task_types {
            handles.push(self.spawn_type_loop(task_type));
        }
        Ok(handles)
    }

    /// Signal all loops to stop.
    pub fn stop(&self) {
        info!("stopping worker {}", self.id);
        let _ = self.shutdown.send(());
    }

    fn spawn_heartbeat_loop(self: &Arc<Self>) -> JoinHandle<()> {
        let worker = Arc::clone(self);
        let mut shutdown_rx = self.shutdown.subscribe();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(worker.config.heartbeat_interval);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = shutdown_rx.recv() => return,
                    _ = ticker.tick() => {
                        if let Err(e) = worker.queue.update_heartbeat(worker.id).await {
                            // A lapsed registration (registry restart, missed
                            // beats) is recovered by registering again.
                            error!("heartbeat failed: {e}");
                            let info = WorkerInfo::new(
                                worker.id,
                                worker.address.clone(),
                                worker.executors.task_types(),
                            );
                            if let Err(e) = worker.queue.register_worker(info).await {
                                error!("re-registration failed: {e}");
                            }
                        }
                    }
                }
            }
        })
    }

    fn spawn_type_loop(self: &Arc<Self>, task_type: String) -> JoinHandle<()> {
        let worker = Arc::clone(self);
        let mut shutdown_rx = self.shutdown.subscribe();
        tokio::spawn(async move {
            debug!("worker {} polling type {task_type}", worker.id);
            loop {
                tokio::select! {
                    _ = shutdown_rx.recv() => {
                        debug!("type loop {task_type} stopped");
                        return;
                    }
                    dequeued = worker.queue.dequeue(
                        &task_type,
                        worker.id,
                        worker.config.dequeue_timeout,
                    ) => {
                        match dequeued {
                            Ok(Some(envelope)) => worker.run_task(envelope).await,
                            Ok(None) => {}
                            Err(e) => {
                                error!("dequeue failed for type {task_type}: {e}");
                                tokio::time::sleep(worker.config.error_backoff).await;
                            }
                        }
                    }
                }
            }
        })
    }

    /// Drive one leased task through the execution protocol.
    pub async fn run_task(&self, envelope: QueueEnvelope) {
        let task = &envelope.task;
        info!("executing task {} ({} / {})", task.id, task.name, task.task_type);

        // At-least-once delivery can hand the same task to two workers; the
        // ingress ack carries the authoritative status, so a task that is
        // already settled is acked away without running its body.
        match self.reporter.report(&StatusReport::running(task.id)).await {
            Ok(ack) if ack.status.is_terminal() => {
                warn!(
                    "task {} already {} in the state store, dropping duplicate delivery",
                    task.id, ack.status
                );
                if let Err(e) = self.queue.ack(&envelope).await {
                    error!("failed to ack duplicate task {}: {e}", task.id);
                }
                return;
            }
            Ok(_) => {}
            Err(e) => warn!("failed to report task {} running: {e}", task.id),
        }

        match self.execute_body(task).await {
            Ok(result) => {
                if let Err(e) = self.queue.ack(&envelope).await {
                    error!("failed to ack task {}: {e}", task.id);
                }
                self.send_report(StatusReport::completed(task.id, result)).await;
                info!("task {} completed", task.id);
            }
            Err(e) => {
                let message = e.to_string();
                error!("task {} failed: {message}", task.id);
                match self.queue.nack(&envelope).await {
                    Ok(NackDisposition::Retried { delay }) => {
                        debug!("task {} will retry in {:?}", task.id, delay);
                        self.send_report(StatusReport::retrying(task.id, message)).await;
                    }
                    Ok(NackDisposition::DeadLettered) => {
                        self.send_report(StatusReport::failed(task.id, message)).await;
                    }
                    Err(nack_err) => {
                        error!("failed to nack task {}: {nack_err}", task.id);
                        self.send_report(StatusReport::failed(task.id, message)).await;
                    }
                }
            }
        }
    }

    async fn execute_body(&self, task: &conveyor_core::Task) -> Result<serde_json::Value, WorkerError> {
        let executor = self
            .executors
            .get(&task.task_type)
            .ok_or_else(|| WorkerError::UnknownTaskType(task.task_type.clone()))?;
        executor.execute(task).await
    }

    async fn send_report(&self, report: StatusReport) {
        if let Err(e) = self.reporter.report(&report).await {
            // The outcome is already recorded in the queue; the scheduler
            // will reconcile the store on a later delivery or reap.
            error!("failed to report task {} {}: {e}", report.task_id, report.status);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::{json, Value};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::Mutex;

    use conveyor_core::{RetryPolicy, StatusAck, Task, TaskStatus};
    use conveyor_queue::{MemoryWorkQueue, QueueEnvelope};

    use crate::executor::{EchoExecutor, TaskExecutor};

    /// Reporter double: records reports and acks with the reported status,
    /// unless primed with a fixed terminal status.
    #[derive(Default)]
    struct RecordingReporter {
        reports: Mutex<Vec<StatusReport>>,
        fixed_status: Option<TaskStatus>,
    }

    #[async_trait]
    impl StatusReporter for RecordingReporter {
        async fn report(&self, report: &StatusReport) -> Result<StatusAck, WorkerError> {
            self.reports.lock().await.push(report.clone());
            Ok(StatusAck {
                status: self.fixed_status.unwrap_or(report.status),
            })
        }
    }

    struct FailingExecutor;

    #[async_trait]
    impl TaskExecutor for FailingExecutor {
        async fn execute(&self, _task: &Task) -> Result<Value, WorkerError> {
            Err(WorkerError::Execution("synthetic failure".into()))
        }
    }

    struct CountingExecutor(AtomicUsize);

    #[async_trait]
    impl TaskExecutor for CountingExecutor {
        async fn execute(&self, _task: &Task) -> Result<Value, WorkerError> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(Value::Null)
        }
    }

    fn runtime(
        queue: Arc<MemoryWorkQueue>,
        reporter: Arc<RecordingReporter>,
        executors: ExecutorRegistry,
    ) -> Arc<WorkerRuntime> {
        Arc::new(WorkerRuntime::new(
            "127.0.0.1:9000",
            queue,
            reporter,
            executors,
            WorkerConfig {
                heartbeat_interval: Duration::from_secs(60),
                dequeue_timeout: Duration::from_millis(100),
                error_backoff: Duration::from_millis(10),
            },
        ))
    }

    fn instant_retries() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            backoff_factor: 2.0,
        }
    }

    #[tokio::test]
    async fn success_acks_and_reports_completed() {
        let queue = Arc::new(MemoryWorkQueue::default());
        let reporter = Arc::new(RecordingReporter::default());
        let worker = runtime(
            queue.clone(),
            reporter.clone(),
            ExecutorRegistry::new().register("generic", Arc::new(EchoExecutor)),
        );

        let task = Task::new(Uuid::new_v4(), "t", "generic", json!({"n": 1}));
        queue.enqueue(QueueEnvelope::new(task)).await.unwrap();
        let envelope = queue
            .dequeue("generic", worker.id(), Duration::from_millis(100))
            .await
            .unwrap()
            .unwrap();

        worker.run_task(envelope).await;

        let stats = queue.stats("generic").await.unwrap();
        assert_eq!(stats.processing, 0);

        let reports = reporter.reports.lock().await;
        assert_eq!(reports.len(), 2);
        assert_eq!(reports[0].status, TaskStatus::Running);
        assert_eq!(reports[1].status, TaskStatus::Completed);
        assert_eq!(reports[1].result.as_ref().unwrap()["echo"]["n"], 1);
    }

    #[tokio::test]
    async fn failure_with_budget_reports_retrying() {
        let queue = Arc::new(MemoryWorkQueue::default());
        let reporter = Arc::new(RecordingReporter::default());
        let worker = runtime(
            queue.clone(),
            reporter.clone(),
            ExecutorRegistry::new().register("generic", Arc::new(FailingExecutor)),
        );

        let task = Task::new(Uuid::new_v4(), "t", "generic", Value::Null).with_max_retries(2);
        queue
            .enqueue(QueueEnvelope::with_retry_policy(task, instant_retries()))
            .await
            .unwrap();
        let envelope = queue
            .dequeue("generic", worker.id(), Duration::from_millis(100))
            .await
            .unwrap()
            .unwrap();

        worker.run_task(envelope).await;

        assert_eq!(queue.stats("generic").await.unwrap().retry, 1);
        let reports = reporter.reports.lock().await;
        assert_eq!(reports[1].status, TaskStatus::Retrying);
        assert_eq!(reports[1].error.as_deref(), Some("synthetic failure"));
    }

    #[tokio::test]
    async fn exhausted_failure_reports_failed_and_dead_letters() {
        let queue = Arc::new(MemoryWorkQueue::default());
        let reporter = Arc::new(RecordingReporter::default());
        let worker = runtime(
            queue.clone(),
            reporter.clone(),
            ExecutorRegistry::new().register("generic", Arc::new(FailingExecutor)),
        );

        let mut task = Task::new(Uuid::new_v4(), "t", "generic", Value::Null).with_max_retries(1);
        task.retry_count = 1;
        queue.enqueue(QueueEnvelope::new(task)).await.unwrap();
        let envelope = queue
            .dequeue("generic", worker.id(), Duration::from_millis(100))
            .await
            .unwrap()
            .unwrap();

        worker.run_task(envelope).await;

        assert_eq!(queue.dead_letters("generic").await.unwrap().len(), 1);
        let reports = reporter.reports.lock().await;
        assert_eq!(reports[1].status, TaskStatus::Failed);
    }

    #[tokio::test]
    async fn duplicate_delivery_is_acked_without_execution() {
        let queue = Arc::new(MemoryWorkQueue::default());
        let reporter = Arc::new(RecordingReporter {
            reports: Mutex::new(Vec::new()),
            fixed_status: Some(TaskStatus::Completed),
        });
        let calls = Arc::new(CountingExecutor(AtomicUsize::new(0)));
        let worker = runtime(
            queue.clone(),
            reporter.clone(),
            ExecutorRegistry::new().register("generic", calls.clone()),
        );

        let task = Task::new(Uuid::new_v4(), "t", "generic", Value::Null);
        queue.enqueue(QueueEnvelope::new(task)).await.unwrap();
        let envelope = queue
            .dequeue("generic", worker.id(), Duration::from_millis(100))
            .await
            .unwrap()
            .unwrap();

        worker.run_task(envelope).await;

        assert_eq!(calls.0.load(Ordering::SeqCst), 0);
        assert_eq!(queue.stats("generic").await.unwrap().processing, 0);
        let reports = reporter.reports.lock().await;
        assert_eq!(reports.len(), 1);
    }

    #[tokio::test]
    async fn unregistered_type_fails_without_executor_panic() {
        let queue = Arc::new(MemoryWorkQueue::default());
        let reporter = Arc::new(RecordingReporter::default());
        let worker = runtime(queue.clone(), reporter.clone(), ExecutorRegistry::new());

        let task = Task::new(Uuid::new_v4(), "t", "mystery", Value::Null).with_max_retries(0);
        queue.enqueue(QueueEnvelope::new(task)).await.unwrap();
        let envelope = queue
            .dequeue("mystery", worker.id(), Duration::from_millis(100))
            .await
            .unwrap()
            .unwrap();

        worker.run_task(envelope).await;

        assert_eq!(queue.dead_letters("mystery").await.unwrap().len(), 1);
        let reports = reporter.reports.lock().await;
        assert_eq!(reports[1].status, TaskStatus::Failed);
        assert!(reports[1].error.as_deref().unwrap().contains("mystery"));
    }

    #[tokio::test]
    async fn full_loop_registers_and_drains_queue() {
        let queue = Arc::new(MemoryWorkQueue::default());
        let reporter = Arc::new(RecordingReporter::default());
        let worker = runtime(
            queue.clone(),
            reporter.clone(),
            ExecutorRegistry::new().register("generic", Arc::new(EchoExecutor)),
        );

        let handles = worker.start().await.unwrap();
        assert_eq!(queue.get_active_workers("generic").await.unwrap().len(), 1);

        let task = Task::new(Uuid::new_v4(), "t", "generic", Value::Null);
        queue.enqueue(QueueEnvelope::new(task)).await.unwrap();

        // Wait for the dequeue loop to pick it up and finish.
        for _ in 0..50 {
            if reporter.reports.lock().await.len() == 2 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(reporter.reports.lock().await.len(), 2);

        worker.stop();
        for handle in handles {
            handle.await.unwrap();
        }
    }
}
