//! # Conveyor API
//!
//! The orchestrator's HTTP surface under `/api/v1`:
//!
//! - workflow submission, inspection and cancellation
//! - the worker status ingress that closes the execution loop
//! - the queue/worker-registry endpoints remote workers speak to
//! - health and metrics

pub mod error;
pub mod handlers;
pub mod ingress;
pub mod monitoring;
pub mod queue_routes;
pub mod routes;
pub mod server;
pub mod state;

pub use error::ApiError;
pub use ingress::StatusIngress;
pub use routes::router;
pub use server::{ApiConfig, ApiServer};
pub use state::ApiState;
