//! # Conveyor Scheduler
//!
//! The orchestration loop: advances workflow DAGs by enqueueing ready tasks,
//! promotes due retries, closes finished workflows, and reaps leases held by
//! vanished workers. One orchestrator process owns all four loops; all
//! cross-component state lives in the state store and work queue.

pub mod error;
pub mod scheduler;

pub use error::SchedulerError;
pub use scheduler::{Scheduler, SchedulerConfig};
