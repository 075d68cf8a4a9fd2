//! Service Module
//!
//! Business logic layer for the orchestrator.
//! Services coordinate the repositories and the remote executor.

pub mod commands;
pub mod handle;
mod in_flight;
pub mod ledger;
pub mod orchestrator;

// Re-export for convenience
pub use handle::{DeferredResult, OperationHandle};
pub use ledger::TaskLedger;
pub use orchestrator::{Orchestrator, RecoveryReport};
