//! Convoy Core
//!
//! Core types and abstractions for the Convoy fleet orchestrator.
//!
//! This crate contains:
//! - Domain types: pipeline instances, machine assignments, the per-machine
//!   lifecycle state machine, tasks and task steps
//! - DTOs: read models handed to callers polling task progress

pub mod domain;
pub mod dto;

/// Identifier of a pipeline instance, owned by the external metadata store
pub type PipelineId = i64;

/// Identifier of a target machine, owned by the external metadata store
pub type MachineId = i64;
