//! In-memory work queue.
//!
//! Channel semantics mirror a list/sorted-set backend: new arrivals push at
//! the head of `ready`, workers pop from the tail, and the retry channel is
//! keyed by the epoch second at which an entry becomes eligible. Every
//! multi-channel move happens under one lock, which is the atomicity a
//! remote backend buys with transactions.

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, Notify};
use tracing::{debug, info, warn};
use uuid::Uuid;

use conveyor_core::{TaskStatus, WorkerInfo};

use crate::error::QueueError;
use crate::queue::{NackDisposition, QueueConfig, QueueEnvelope, QueueStats, WorkQueue};

/// A task currently leased to a worker.
struct Lease {
    envelope: QueueEnvelope,
    worker_id: Uuid,
    leased_at: DateTime<Utc>,
}

#[derive(Default)]
struct Channel {
    ready: VecDeque<QueueEnvelope>,
    processing: Vec<Lease>,
    /// Keyed by (eligible-at epoch seconds, insertion sequence).
    retry: BTreeMap<(i64, u64), QueueEnvelope>,
    dead_letter: Vec<QueueEnvelope>,
}

struct Registered {
    info: WorkerInfo,
    expires_at: DateTime<Utc>,
}

#[derive(Default)]
struct Inner {
    channels: HashMap<String, Channel>,
    notifies: HashMap<String, Arc<Notify>>,
    workers: HashMap<Uuid, Registered>,
    workers_by_type: HashMap<String, HashSet<Uuid>>,
    retry_seq: u64,
}

impl Inner {
    fn notify_for(&mut self, task_type: &str) -> Arc<Notify> {
        self.notifies
            .entry(task_type.to_string())
            .or_insert_with(|| Arc::new(Notify::new()))
            .clone()
    }

    /// Drop registry entries that are expired or stale, then return the ids
    /// of workers still serving `task_type`.
    fn active_worker_ids(&mut self, task_type: &str, config: &QueueConfig) -> HashSet<Uuid> {
        let now = Utc::now();
        let candidates: Vec<Uuid> = self
            .workers_by_type
            .get(task_type)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default();

        let mut alive = HashSet::new();
        for id in candidates {
            let keep = match self.workers.get(&id) {
                Some(entry) => {
                    now <= entry.expires_at
                        && (now - entry.info.last_heartbeat).to_std().unwrap_or_default()
                            <= config.heartbeat_timeout
                }
                None => false,
            };
            if keep {
                alive.insert(id);
            } else {
                self.evict_worker(id);
            }
        }
        alive
    }

    fn evict_worker(&mut self, id: Uuid) {
        if let Some(entry) = self.workers.remove(&id) {
            debug!("evicting worker {} ({})", id, entry.info.address);
        }
        for set in self.workers_by_type.values_mut() {
            set.remove(&id);
        }
    }
}

/// In-process queue backend.
pub struct MemoryWorkQueue {
    config: QueueConfig,
    state: Mutex<Inner>,
}

impl MemoryWorkQueue {
    /// Create a queue with the given tunables.
    pub fn new(config: QueueConfig) -> Self {
        Self {
            config,
            state: Mutex::new(Inner::default()),
        }
    }

    fn ttl_delta(&self) -> chrono::Duration {
        chrono::Duration::from_std(self.config.worker_ttl)
            .unwrap_or_else(|_| chrono::Duration::zero())
    }
}

impl Default for MemoryWorkQueue {
    fn default() -> Self {
        Self::new(QueueConfig::default())
    }
}

#[async_trait]
impl WorkQueue for MemoryWorkQueue {
    async fn enqueue(&self, envelope: QueueEnvelope) -> Result<(), QueueError> {
        let task_type = envelope.task.task_type.clone();
        let notify = {
            let mut inner = self.state.lock().await;
            debug!(
                "enqueueing task {} on queue {}",
                envelope.task.id, task_type
            );
            inner
                .channels
                .entry(task_type.clone())
                .or_default()
                .ready
                .push_front(envelope);
            inner.notify_for(&task_type)
        };
        notify.notify_one();
        Ok(())
    }

    async fn dequeue(
        &self,
        task_type: &str,
        worker_id: Uuid,
        timeout: Duration,
    ) -> Result<Option<QueueEnvelope>, QueueError> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let notify = {
                let mut inner = self.state.lock().await;
                let channel = inner.channels.entry(task_type.to_string()).or_default();
                if let Some(envelope) = channel.ready.pop_back() {
                    channel.processing.push(Lease {
                        envelope: envelope.clone(),
                        worker_id,
                        leased_at: Utc::now(),
                    });
                    debug!(
                        "task {} leased to worker {} from queue {}",
                        envelope.task.id, worker_id, task_type
                    );
                    return Ok(Some(envelope));
                }
                inner.notify_for(task_type)
            };

            tokio::select! {
                _ = notify.notified() => {}
                _ = tokio::time::sleep_until(deadline) => return Ok(None),
            }
        }
    }

    async fn ack(&self, envelope: &QueueEnvelope) -> Result<(), QueueError> {
        let mut inner = self.state.lock().await;
        if let Some(channel) = inner.channels.get_mut(&envelope.task.task_type) {
            if let Some(pos) = channel.processing.iter().position(|lease| {
                lease.envelope.task.id == envelope.task.id
                    && lease.envelope.task.retry_count == envelope.task.retry_count
            }) {
                channel.processing.remove(pos);
                debug!("acked task {}", envelope.task.id);
                return Ok(());
            }
        }
        warn!("ack for task {} found no lease", envelope.task.id);
        Ok(())
    }

    async fn nack(&self, envelope: &QueueEnvelope) -> Result<NackDisposition, QueueError> {
        let mut inner = self.state.lock().await;
        let seq = {
            inner.retry_seq += 1;
            inner.retry_seq
        };
        let channel = inner
            .channels
            .entry(envelope.task.task_type.clone())
            .or_default();

        if let Some(pos) = channel.processing.iter().position(|lease| {
            lease.envelope.task.id == envelope.task.id
                && lease.envelope.task.retry_count == envelope.task.retry_count
        }) {
            channel.processing.remove(pos);
        }

        let task = &envelope.task;
        if task.retry_count < task.max_retries {
            let policy = envelope
                .retry_policy
                .clone()
                .unwrap_or_else(|| self.config.default_backoff.clone());
            let delay = policy.delay_for(task.retry_count);

            // The requeued copy carries the consumed attempt so the budget
            // check agrees with the state store's counter.
            let mut requeued = envelope.clone();
            requeued.task.retry_count += 1;
            requeued.task.status = TaskStatus::Retrying;

            let eligible_at = (Utc::now()
                + chrono::Duration::from_std(delay).unwrap_or_else(|_| chrono::Duration::zero()))
            .timestamp();
            channel.retry.insert((eligible_at, seq), requeued);
            debug!(
                "task {} scheduled for retry {} in {:?}",
                task.id,
                task.retry_count + 1,
                delay
            );
            Ok(NackDisposition::Retried { delay })
        } else {
            channel.dead_letter.push(envelope.clone());
            info!(
                "task {} exhausted {} retries, moved to dead letter",
                task.id, task.max_retries
            );
            Ok(NackDisposition::DeadLettered)
        }
    }

    async fn process_retries(&self, task_type: &str) -> Result<usize, QueueError> {
        let (promoted, notify) = {
            let mut inner = self.state.lock().await;
            let now = Utc::now().timestamp();
            let channel = inner.channels.entry(task_type.to_string()).or_default();

            let due: Vec<(i64, u64)> = channel
                .retry
                .range(..=(now, u64::MAX))
                .map(|(key, _)| *key)
                .collect();
            let count = due.len();
            for key in due {
                if let Some(envelope) = channel.retry.remove(&key) {
                    debug!("promoting retry task {}", envelope.task.id);
                    channel.ready.push_front(envelope);
                }
            }
            (count, inner.notify_for(task_type))
        };

        for _ in 0..promoted {
            notify.notify_one();
        }
        Ok(promoted)
    }

    async fn reap_orphaned(&self, task_type: &str) -> Result<Vec<QueueEnvelope>, QueueError> {
        let (reaped, notify) = {
            let mut inner = self.state.lock().await;
            let alive = inner.active_worker_ids(task_type, &self.config);
            let channel = inner.channels.entry(task_type.to_string()).or_default();

            let mut reaped = Vec::new();
            let mut index = 0;
            while index < channel.processing.len() {
                if alive.contains(&channel.processing[index].worker_id) {
                    index += 1;
                    continue;
                }
                let lease = channel.processing.remove(index);
                warn!(
                    "reaping task {} leased to lost worker {} at {}",
                    lease.envelope.task.id, lease.worker_id, lease.leased_at
                );
                channel.ready.push_front(lease.envelope.clone());
                reaped.push(lease.envelope);
            }
            (reaped, inner.notify_for(task_type))
        };

        for _ in 0..reaped.len() {
            notify.notify_one();
        }
        Ok(reaped)
    }

    async fn stats(&self, task_type: &str) -> Result<QueueStats, QueueError> {
        let inner = self.state.lock().await;
        Ok(inner
            .channels
            .get(task_type)
            .map(|c| QueueStats {
                ready: c.ready.len(),
                processing: c.processing.len(),
                retry: c.retry.len(),
                dead_letter: c.dead_letter.len(),
            })
            .unwrap_or_default())
    }

    async fn dead_letters(&self, task_type: &str) -> Result<Vec<QueueEnvelope>, QueueError> {
        let inner = self.state.lock().await;
        Ok(inner
            .channels
            .get(task_type)
            .map(|c| c.dead_letter.clone())
            .unwrap_or_default())
    }

    async fn known_types(&self) -> Result<Vec<String>, QueueError> {
        let inner = self.state.lock().await;
        let mut types: Vec<String> = inner.channels.keys().cloned().collect();
        types.sort();
        Ok(types)
    }

    async fn register_worker(&self, info: WorkerInfo) -> Result<(), QueueError> {
        let mut inner = self.state.lock().await;
        info!(
            "registered worker {} at {} for {:?}",
            info.id, info.address, info.task_types
        );
        for task_type in &info.task_types {
            inner
                .workers_by_type
                .entry(task_type.clone())
                .or_default()
                .insert(info.id);
        }
        let expires_at = Utc::now() + self.ttl_delta();
        inner.workers.insert(info.id, Registered { info, expires_at });
        Ok(())
    }

    async fn update_heartbeat(&self, worker_id: Uuid) -> Result<(), QueueError> {
        let mut inner = self.state.lock().await;
        let now = Utc::now();
        let ttl = self.ttl_delta();
        let expired = match inner.workers.get_mut(&worker_id) {
            Some(entry) if now <= entry.expires_at => {
                entry.info.last_heartbeat = now;
                entry.expires_at = now + ttl;
                return Ok(());
            }
            Some(_) => true,
            None => false,
        };
        if expired {
            inner.evict_worker(worker_id);
        }
        Err(QueueError::WorkerNotFound(worker_id))
    }

    async fn get_active_workers(&self, task_type: &str) -> Result<Vec<WorkerInfo>, QueueError> {
        let mut inner = self.state.lock().await;
        let alive = inner.active_worker_ids(task_type, &self.config);
        Ok(inner
            .workers
            .values()
            .filter(|entry| alive.contains(&entry.info.id))
            .map(|entry| entry.info.clone())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use conveyor_core::{RetryPolicy, Task};
    use serde_json::Value;

    fn envelope(task_type: &str, max_retries: u32) -> QueueEnvelope {
        let task = Task::new(Uuid::new_v4(), "t", task_type, Value::Null)
            .with_max_retries(max_retries);
        QueueEnvelope::new(task)
    }

    fn instant_retry() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            backoff_factor: 2.0,
        }
    }

    #[tokio::test]
    async fn dequeue_is_fifo_and_moves_to_processing() {
        let queue = MemoryWorkQueue::default();
        let worker = Uuid::new_v4();
        let first = envelope("etl", 0);
        let second = envelope("etl", 0);

        queue.enqueue(first.clone()).await.unwrap();
        queue.enqueue(second.clone()).await.unwrap();

        let got = queue
            .dequeue("etl", worker, Duration::from_millis(100))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(got.task.id, first.task.id);

        let stats = queue.stats("etl").await.unwrap();
        assert_eq!(stats.ready, 1);
        assert_eq!(stats.processing, 1);
    }

    #[tokio::test]
    async fn dequeue_times_out_on_empty_queue() {
        let queue = MemoryWorkQueue::default();
        let got = queue
            .dequeue("etl", Uuid::new_v4(), Duration::from_millis(50))
            .await
            .unwrap();
        assert!(got.is_none());
    }

    #[tokio::test]
    async fn dequeue_wakes_on_enqueue() {
        let queue = Arc::new(MemoryWorkQueue::default());
        let waiter = {
            let queue = queue.clone();
            tokio::spawn(async move {
                queue
                    .dequeue("etl", Uuid::new_v4(), Duration::from_secs(5))
                    .await
                    .unwrap()
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        queue.enqueue(envelope("etl", 0)).await.unwrap();
        let got = waiter.await.unwrap();
        assert!(got.is_some());
    }

    #[tokio::test]
    async fn ack_removes_exactly_one_lease() {
        let queue = MemoryWorkQueue::default();
        let worker = Uuid::new_v4();
        let env = envelope("etl", 0);
        queue.enqueue(env.clone()).await.unwrap();
        let got = queue
            .dequeue("etl", worker, Duration::from_millis(100))
            .await
            .unwrap()
            .unwrap();

        queue.ack(&got).await.unwrap();
        let stats = queue.stats("etl").await.unwrap();
        assert_eq!(stats.processing, 0);
        assert_eq!(stats.ready, 0);
    }

    #[tokio::test]
    async fn nack_with_budget_schedules_retry() {
        let queue = MemoryWorkQueue::default();
        let worker = Uuid::new_v4();
        let task = Task::new(Uuid::new_v4(), "flaky", "etl", Value::Null).with_max_retries(2);
        let env = QueueEnvelope::with_retry_policy(task, instant_retry());

        queue.enqueue(env).await.unwrap();
        let got = queue
            .dequeue("etl", worker, Duration::from_millis(100))
            .await
            .unwrap()
            .unwrap();

        let disposition = queue.nack(&got).await.unwrap();
        assert!(matches!(disposition, NackDisposition::Retried { .. }));

        let stats = queue.stats("etl").await.unwrap();
        assert_eq!(stats.processing, 0);
        assert_eq!(stats.retry, 1);

        // The delay is zero, so the entry is already due.
        let promoted = queue.process_retries("etl").await.unwrap();
        assert_eq!(promoted, 1);

        let again = queue
            .dequeue("etl", worker, Duration::from_millis(100))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(again.task.retry_count, 1);
        assert_eq!(again.task.status, TaskStatus::Retrying);
    }

    #[tokio::test]
    async fn future_retries_are_not_promoted_early() {
        let queue = MemoryWorkQueue::default();
        let worker = Uuid::new_v4();
        let task = Task::new(Uuid::new_v4(), "slow", "etl", Value::Null).with_max_retries(1);
        let policy = RetryPolicy {
            initial_delay: Duration::from_secs(3600),
            ..RetryPolicy::default()
        };
        queue
            .enqueue(QueueEnvelope::with_retry_policy(task, policy))
            .await
            .unwrap();
        let got = queue
            .dequeue("etl", worker, Duration::from_millis(100))
            .await
            .unwrap()
            .unwrap();
        queue.nack(&got).await.unwrap();

        assert_eq!(queue.process_retries("etl").await.unwrap(), 0);
        assert_eq!(queue.stats("etl").await.unwrap().retry, 1);
    }

    #[tokio::test]
    async fn exhausted_budget_moves_to_dead_letter() {
        let queue = MemoryWorkQueue::default();
        let worker = Uuid::new_v4();
        let mut env = envelope("etl", 1);
        env.task.retry_count = 1; // budget already consumed

        queue.enqueue(env).await.unwrap();
        let got = queue
            .dequeue("etl", worker, Duration::from_millis(100))
            .await
            .unwrap()
            .unwrap();

        let disposition = queue.nack(&got).await.unwrap();
        assert_eq!(disposition, NackDisposition::DeadLettered);

        let dead = queue.dead_letters("etl").await.unwrap();
        assert_eq!(dead.len(), 1);
        assert_eq!(queue.stats("etl").await.unwrap().retry, 0);
    }

    #[tokio::test]
    async fn task_occupies_one_channel_at_a_time() {
        let queue = MemoryWorkQueue::default();
        let worker = Uuid::new_v4();
        let task = Task::new(Uuid::new_v4(), "t", "etl", Value::Null).with_max_retries(1);
        queue
            .enqueue(QueueEnvelope::with_retry_policy(task, instant_retry()))
            .await
            .unwrap();

        let total = |s: QueueStats| s.ready + s.processing + s.retry + s.dead_letter;

        assert_eq!(total(queue.stats("etl").await.unwrap()), 1);
        let got = queue
            .dequeue("etl", worker, Duration::from_millis(100))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(total(queue.stats("etl").await.unwrap()), 1);
        queue.nack(&got).await.unwrap();
        assert_eq!(total(queue.stats("etl").await.unwrap()), 1);
        queue.process_retries("etl").await.unwrap();
        let got = queue
            .dequeue("etl", worker, Duration::from_millis(100))
            .await
            .unwrap()
            .unwrap();
        queue.nack(&got).await.unwrap();
        // Budget exhausted: the single copy now rests in dead letter.
        let stats = queue.stats("etl").await.unwrap();
        assert_eq!(total(stats), 1);
        assert_eq!(stats.dead_letter, 1);
    }

    #[tokio::test]
    async fn registry_tracks_active_workers() {
        let queue = MemoryWorkQueue::default();
        let id = Uuid::new_v4();
        queue
            .register_worker(WorkerInfo::new(id, "host:9000", vec!["etl".into()]))
            .await
            .unwrap();

        let active = queue.get_active_workers("etl").await.unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].id, id);

        queue.update_heartbeat(id).await.unwrap();
        assert!(queue
            .update_heartbeat(Uuid::new_v4())
            .await
            .is_err());
    }

    #[tokio::test]
    async fn stale_workers_are_evicted() {
        let config = QueueConfig {
            heartbeat_timeout: Duration::ZERO,
            ..QueueConfig::default()
        };
        let queue = MemoryWorkQueue::new(config);
        let id = Uuid::new_v4();
        queue
            .register_worker(WorkerInfo::new(id, "host:9000", vec!["etl".into()]))
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(queue.get_active_workers("etl").await.unwrap().is_empty());
        // Eviction is a full GC: the heartbeat key is gone too.
        assert!(queue.update_heartbeat(id).await.is_err());
    }

    #[tokio::test]
    async fn reaper_requeues_lost_worker_leases_unchanged() {
        let config = QueueConfig {
            heartbeat_timeout: Duration::ZERO,
            ..QueueConfig::default()
        };
        let queue = MemoryWorkQueue::new(config);
        let worker = Uuid::new_v4();
        queue
            .register_worker(WorkerInfo::new(worker, "host:9000", vec!["etl".into()]))
            .await
            .unwrap();

        let env = envelope("etl", 3);
        queue.enqueue(env.clone()).await.unwrap();
        queue
            .dequeue("etl", worker, Duration::from_millis(100))
            .await
            .unwrap()
            .unwrap();

        tokio::time::sleep(Duration::from_millis(10)).await;
        let reaped = queue.reap_orphaned("etl").await.unwrap();
        assert_eq!(reaped.len(), 1);
        // Redelivery, not failure: the attempt count is untouched.
        assert_eq!(reaped[0].task.retry_count, 0);

        let stats = queue.stats("etl").await.unwrap();
        assert_eq!(stats.ready, 1);
        assert_eq!(stats.processing, 0);
    }

    #[tokio::test]
    async fn reaper_spares_live_worker_leases() {
        let queue = MemoryWorkQueue::default();
        let worker = Uuid::new_v4();
        queue
            .register_worker(WorkerInfo::new(worker, "host:9000", vec!["etl".into()]))
            .await
            .unwrap();

        queue.enqueue(envelope("etl", 3)).await.unwrap();
        queue
            .dequeue("etl", worker, Duration::from_millis(100))
            .await
            .unwrap()
            .unwrap();

        assert!(queue.reap_orphaned("etl").await.unwrap().is_empty());
        assert_eq!(queue.stats("etl").await.unwrap().processing, 1);
    }
}
