//! # Conveyor Queue
//!
//! The work queue is the only coordination surface between the orchestrator
//! and its workers. Per task type it keeps four channels:
//!
//! - **ready** — tasks available for pickup (FIFO)
//! - **processing** — tasks leased to a worker
//! - **retry** — tasks waiting out their backoff
//! - **dead letter** — tasks whose retry budget is exhausted
//!
//! plus a worker registry with TTL-based liveness.
//!
//! [`MemoryWorkQueue`] is the in-process backend; [`HttpWorkQueue`] speaks
//! to an orchestrator's queue endpoints so workers can run on other hosts.

pub mod error;
pub mod http;
pub mod memory;
pub mod queue;

pub use error::QueueError;
pub use http::HttpWorkQueue;
pub use memory::MemoryWorkQueue;
pub use queue::{NackDisposition, QueueConfig, QueueEnvelope, QueueStats, WorkQueue};
