//! Repository Module
//!
//! Data access layer for the orchestrator.
//! Storage sits behind traits so the ledger can run on Postgres or in memory.

mod machine_state;
mod memory;
mod task;

// Re-export traits
pub use machine_state::MachineStateRepository;
pub use task::TaskRepository;

// Re-export implementations
pub use machine_state::PgMachineStateRepository;
pub use memory::{InMemoryMachineStateRepository, InMemoryTaskRepository};
pub use task::PgTaskRepository;
