//! A standalone distributed transaction coordinator.
//!
//! Independent business services commit or roll back a multi-step operation
//! as a unit, without a shared database transaction, by registering a global
//! transaction here and letting the engine drive each branch call to a
//! terminal outcome. Three patterns are supported:
//!
//! - **SAGA**: ordered forward actions with reverse-order compensations.
//! - **TCC**: Try/Confirm/Cancel with resources reserved during Try.
//! - **XA**: two-phase commit over remote resource managers.
//!
//! Every status transition is persisted behind a compare-and-swap contract,
//! and a recovery scheduler re-drives transactions stuck in a non-terminal
//! status. A request can die at any point; a later scheduler pass finishes
//! the job.

pub mod branch;
pub mod config;
pub mod coordinator;
pub mod cron;
pub mod http;
pub mod protocol;
pub mod storage;
pub mod trans;

pub use branch::{BranchCaller, BranchResult, HttpBranchCaller};
pub use config::CoordinatorConfig;
pub use coordinator::Coordinator;
pub use cron::Scheduler;
pub use protocol::{Driver, TransError};
pub use storage::memory::MemoryStore;
pub use storage::TransStore;
