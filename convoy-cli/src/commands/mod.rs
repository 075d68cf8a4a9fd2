//! Commands module
//!
//! Defines all CLI commands and their handlers.

mod display;
mod machine;
mod pipeline;
mod task;

pub use machine::MachineCommands;
pub use pipeline::PipelineCommands;
pub use task::TaskCommands;

use anyhow::Result;
use clap::Subcommand;
use colored::*;

use crate::config::Config;
use crate::context::Context;

/// Top-level CLI commands
#[derive(Subcommand)]
pub enum Commands {
    /// Pipeline operations across machines
    Pipeline {
        #[command(subcommand)]
        command: PipelineCommands,
    },
    /// Task ledger queries and cleanup
    Task {
        #[command(subcommand)]
        command: TaskCommands,
    },
    /// Machine inventory and connectivity
    Machine {
        #[command(subcommand)]
        command: MachineCommands,
    },
    /// Repair machines and tasks left behind by an interrupted run
    Recover,
}

/// Handle a CLI command
///
/// Connects the in-process orchestrator, then routes the command to the
/// appropriate handler module.
pub async fn handle_command(command: Commands, config: &Config) -> Result<()> {
    let ctx = Context::connect(config).await?;

    match command {
        Commands::Pipeline { command } => pipeline::handle_pipeline_command(command, &ctx).await,
        Commands::Task { command } => task::handle_task_command(command, &ctx).await,
        Commands::Machine { command } => machine::handle_machine_command(command, &ctx).await,
        Commands::Recover => recover(&ctx).await,
    }
}

async fn recover(ctx: &Context) -> Result<()> {
    let report = ctx.orchestrator.recover_interrupted().await?;

    if report.machines_recovered == 0 && report.tasks_finalized == 0 {
        println!("{}", "Nothing to recover.".green());
    } else {
        println!("{}", "Recovered interrupted work:".bold());
        println!("  Machines: {}", report.machines_recovered.to_string().yellow());
        println!("  Tasks:    {}", report.tasks_finalized.to_string().yellow());
    }

    Ok(())
}
