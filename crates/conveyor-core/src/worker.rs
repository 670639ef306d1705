//! Worker identity and liveness record.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Worker liveness status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkerStatus {
    /// Registered and heartbeating.
    Active,
    /// Registered but not currently executing.
    Idle,
    /// Missed its heartbeat window.
    Offline,
}

/// Registry record for a worker process.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerInfo {
    /// Unique worker ID.
    pub id: Uuid,
    /// Network address the worker advertises.
    pub address: String,
    /// Task types this worker serves.
    pub task_types: Vec<String>,
    /// Liveness status.
    pub status: WorkerStatus,
    /// Last heartbeat time.
    pub last_heartbeat: DateTime<Utc>,
    /// Tasks currently leased to this worker. Informational only.
    pub current_tasks: Vec<Uuid>,
}

impl WorkerInfo {
    /// Create an active worker record stamped with the current time.
    pub fn new(id: Uuid, address: impl Into<String>, task_types: Vec<String>) -> Self {
        Self {
            id,
            address: address.into(),
            task_types,
            status: WorkerStatus::Active,
            last_heartbeat: Utc::now(),
            current_tasks: Vec::new(),
        }
    }
}
