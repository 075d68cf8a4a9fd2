//! Core domain types
//!
//! This module contains the core domain structures used across Convoy crates.
//! These types carry no I/O; persistence lives in the orchestrator and remote
//! execution in the ssh crate.

pub mod lifecycle;
pub mod machine;
pub mod pipeline;
pub mod task;
