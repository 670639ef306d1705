//! Work queue trait and queued-payload types.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use conveyor_core::{RetryPolicy, Task, WorkerInfo};

use crate::error::QueueError;

/// The serialized unit that travels through queue channels.
///
/// The owning workflow's retry policy rides along with the task so backoff
/// honours per-workflow overrides without a store lookup on the queue path.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueEnvelope {
    pub task: Task,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_policy: Option<RetryPolicy>,
}

impl QueueEnvelope {
    /// Wrap a task with the default backoff.
    pub fn new(task: Task) -> Self {
        Self {
            task,
            retry_policy: None,
        }
    }

    /// Wrap a task with a workflow's retry policy.
    pub fn with_retry_policy(task: Task, retry_policy: RetryPolicy) -> Self {
        Self {
            task,
            retry_policy: Some(retry_policy),
        }
    }
}

/// Where a nacked task ended up.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum NackDisposition {
    /// Scheduled for another attempt after `delay`.
    Retried {
        #[serde(with = "humantime_serde")]
        delay: Duration,
    },
    /// Retry budget exhausted; parked in the dead-letter channel.
    DeadLettered,
}

/// Channel lengths for one task type.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStats {
    pub ready: usize,
    pub processing: usize,
    pub retry: usize,
    pub dead_letter: usize,
}

/// Tunables for queue backends.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Registry TTL: a worker that has not re-registered or heartbeated
    /// within this window is dropped entirely.
    pub worker_ttl: Duration,
    /// A worker whose last heartbeat is older than this is treated as gone
    /// and its leases become reapable.
    pub heartbeat_timeout: Duration,
    /// Backoff applied when an envelope carries no retry policy.
    pub default_backoff: RetryPolicy,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            worker_ttl: Duration::from_secs(300),
            heartbeat_timeout: Duration::from_secs(120),
            default_backoff: RetryPolicy {
                max_attempts: 3,
                initial_delay: Duration::from_secs(2),
                max_delay: Duration::from_secs(300),
                backoff_factor: 2.0,
            },
        }
    }
}

/// Distributed task queue with at-least-once delivery.
///
/// All operations are atomic with respect to each other: a dequeue never
/// drops a task between the ready and processing channels, and a nack moves
/// a task from processing to exactly one of retry or dead-letter.
#[async_trait]
pub trait WorkQueue: Send + Sync {
    /// Push an envelope onto the head of `ready[type]`. No deduplication:
    /// enqueueing the same task twice offers both copies.
    async fn enqueue(&self, envelope: QueueEnvelope) -> Result<(), QueueError>;

    /// Blocking pop from the tail of `ready[type]`, atomically leasing the
    /// task to `worker_id` in `processing[type]`. Returns `None` on timeout.
    async fn dequeue(
        &self,
        task_type: &str,
        worker_id: Uuid,
        timeout: Duration,
    ) -> Result<Option<QueueEnvelope>, QueueError>;

    /// Remove exactly one matching lease from `processing[type]`.
    async fn ack(&self, envelope: &QueueEnvelope) -> Result<(), QueueError>;

    /// Remove the lease and either schedule a retry (with backoff keyed on
    /// the attempt count) or move the task to the dead-letter channel.
    async fn nack(&self, envelope: &QueueEnvelope) -> Result<NackDisposition, QueueError>;

    /// Move every retry entry whose time has come back to the head of
    /// `ready[type]`. Returns the number promoted.
    async fn process_retries(&self, task_type: &str) -> Result<usize, QueueError>;

    /// Re-enqueue processing entries whose leasing worker is no longer
    /// active. Returns the reaped envelopes. Attempt counts are untouched:
    /// this is redelivery, not failure.
    async fn reap_orphaned(&self, task_type: &str) -> Result<Vec<QueueEnvelope>, QueueError>;

    /// Channel lengths for one task type.
    async fn stats(&self, task_type: &str) -> Result<QueueStats, QueueError>;

    /// Dead-letter contents for inspection.
    async fn dead_letters(&self, task_type: &str) -> Result<Vec<QueueEnvelope>, QueueError>;

    /// Every task type that has ever had a channel.
    async fn known_types(&self) -> Result<Vec<String>, QueueError>;

    /// Record a worker under the registry TTL and add it to the set for
    /// each task type it serves.
    async fn register_worker(&self, info: WorkerInfo) -> Result<(), QueueError>;

    /// Refresh a worker's TTL and heartbeat stamp.
    async fn update_heartbeat(&self, worker_id: Uuid) -> Result<(), QueueError>;

    /// Workers serving `task_type` that are still alive; expired entries
    /// are garbage-collected on the way through.
    async fn get_active_workers(&self, task_type: &str) -> Result<Vec<WorkerInfo>, QueueError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;

    #[test]
    fn envelope_roundtrips_without_policy() {
        let task = Task::new(Uuid::new_v4(), "t", "generic", Value::Null);
        let envelope = QueueEnvelope::new(task);
        let json = serde_json::to_string(&envelope).unwrap();
        assert!(!json.contains("retry_policy"));
        let back: QueueEnvelope = serde_json::from_str(&json).unwrap();
        assert!(back.retry_policy.is_none());
    }

    #[test]
    fn disposition_serializes_tagged() {
        let retried = NackDisposition::Retried {
            delay: Duration::from_secs(4),
        };
        let json = serde_json::to_value(retried).unwrap();
        assert_eq!(json["outcome"], "retried");
        assert_eq!(json["delay"], "4s");

        let dead = serde_json::to_value(NackDisposition::DeadLettered).unwrap();
        assert_eq!(dead["outcome"], "dead_lettered");
    }
}
