//! # Conveyor Store
//!
//! The state store is the source of truth for workflows and tasks. All
//! status mutations flow through it; the work queue only ever holds
//! transient copies.
//!
//! Two backends are provided:
//!
//! - [`MemoryStore`] — in-process, for tests and single-node setups
//! - [`FileStore`] — JSON file per entity with status-keyed directories

pub mod error;
pub mod file;
pub mod memory;
pub mod store;

pub use error::StoreError;
pub use file::FileStore;
pub use memory::MemoryStore;
pub use store::{ListParams, StateStore, WorkflowPage};
