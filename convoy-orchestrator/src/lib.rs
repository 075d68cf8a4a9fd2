//! Convoy Orchestrator
//!
//! Coordinates deployment, start and stop, configuration pushes and directory
//! cleanup of pipeline instances across fleets of machines, recording every
//! operation in a task ledger that callers can poll.
//!
//! # Example
//!
//! ```no_run
//! use convoy_orchestrator::{Config, InventoryFile, Orchestrator, db};
//! use convoy_orchestrator::lookup::{MachineLookup, PipelineLookup};
//! use convoy_orchestrator::repository::{PgMachineStateRepository, PgTaskRepository};
//! use convoy_ssh::SshExecutor;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::from_env()?;
//!     let pool = db::create_pool(&config.database_url).await?;
//!     db::run_migrations(&pool).await?;
//!
//!     let inventory = Arc::new(InventoryFile::load("inventory.json").await?);
//!     let orchestrator = Orchestrator::new(
//!         config.clone(),
//!         Arc::new(SshExecutor::new(config.ssh_config())),
//!         inventory.clone(),
//!         Arc::new(PgTaskRepository::new(pool.clone())),
//!         Arc::new(PgMachineStateRepository::new(pool)),
//!     );
//!
//!     let pipeline = inventory.get_pipeline(1).await?;
//!     let machines = inventory.get_machines(&[10, 11]).await?;
//!     orchestrator.initialize(pipeline, machines).await?.wait().await?;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod db;
pub mod error;
pub mod lookup;
pub mod repository;
pub mod service;

pub use config::Config;
pub use error::{OrchestratorError, Result};
pub use lookup::InventoryFile;
pub use service::{DeferredResult, OperationHandle, Orchestrator, RecoveryReport, TaskLedger};
