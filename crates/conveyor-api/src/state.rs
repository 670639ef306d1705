//! Shared application state.

use std::sync::Arc;
use std::time::Instant;

use conveyor_queue::WorkQueue;
use conveyor_scheduler::Scheduler;
use conveyor_store::StateStore;

use crate::ingress::StatusIngress;

/// State shared across handlers.
pub struct ApiState {
    pub scheduler: Arc<Scheduler>,
    pub store: Arc<dyn StateStore>,
    pub queue: Arc<dyn WorkQueue>,
    pub ingress: StatusIngress,
    started_at: Instant,
}

impl ApiState {
    pub fn new(
        scheduler: Arc<Scheduler>,
        store: Arc<dyn StateStore>,
        queue: Arc<dyn WorkQueue>,
    ) -> Self {
        Self {
            scheduler,
            ingress: StatusIngress::new(store.clone()),
            store,
            queue,
            started_at: Instant::now(),
        }
    }

    /// Seconds since the server came up.
    pub fn uptime_seconds(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }
}
