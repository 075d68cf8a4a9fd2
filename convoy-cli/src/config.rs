//! Configuration module
//!
//! Settings given on the command line. Everything else is read from the
//! environment by the orchestrator configuration.

use std::path::PathBuf;

/// CLI configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Postgres URL of the task ledger, overrides `DATABASE_URL`
    pub database_url: String,

    /// Path of the JSON inventory
    pub inventory: PathBuf,
}
