//! # Conveyor Worker
//!
//! The worker runtime dequeues tasks for the types it serves, executes them
//! through pluggable [`TaskExecutor`]s, and reports every outcome back to
//! the orchestrator's status ingress. Delivery is at-least-once: a worker
//! that dies mid-task simply leaves its lease for the reaper.

pub mod error;
pub mod executor;
pub mod reporter;
pub mod runtime;

pub use error::WorkerError;
pub use executor::{EchoExecutor, ExecutorRegistry, TaskExecutor};
pub use reporter::{HttpStatusReporter, StatusReporter};
pub use runtime::{WorkerConfig, WorkerRuntime};
