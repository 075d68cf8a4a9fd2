//! Wiring of the in-process orchestrator

use anyhow::{Context as _, Result};
use convoy_orchestrator::repository::{PgMachineStateRepository, PgTaskRepository};
use convoy_orchestrator::{InventoryFile, Orchestrator, db};
use convoy_ssh::SshExecutor;
use std::sync::Arc;
use tracing::debug;

use crate::config::Config;

/// Orchestrator plus the inventory it resolves ids against
pub struct Context {
    pub orchestrator: Orchestrator,
    pub inventory: Arc<InventoryFile>,
}

impl Context {
    /// Loads the inventory, connects to the ledger and builds the orchestrator
    pub async fn connect(config: &Config) -> Result<Self> {
        let mut settings = convoy_orchestrator::Config::from_env()?;
        settings.database_url = config.database_url.clone();
        settings.validate()?;

        let inventory = InventoryFile::load(&config.inventory)
            .await
            .with_context(|| format!("Failed to load inventory {}", config.inventory.display()))?;
        let inventory = Arc::new(inventory);

        let pool = db::create_pool(&settings.database_url)
            .await
            .context("Failed to connect to the task ledger")?;
        db::run_migrations(&pool)
            .await
            .context("Failed to run database migrations")?;
        debug!("Task ledger ready");

        let orchestrator = Orchestrator::new(
            settings.clone(),
            Arc::new(SshExecutor::new(settings.ssh_config())),
            inventory.clone(),
            Arc::new(PgTaskRepository::new(pool.clone())),
            Arc::new(PgMachineStateRepository::new(pool)),
        );

        Ok(Self {
            orchestrator,
            inventory,
        })
    }
}
