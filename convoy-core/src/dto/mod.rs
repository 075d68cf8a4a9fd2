//! Data Transfer Objects
//!
//! Read models handed to callers (CLI, an external web layer) that poll task
//! progress. They are assembled from ledger records and never persisted.

pub mod task;
