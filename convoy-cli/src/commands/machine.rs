//! Machine command handlers

use anyhow::{Result, bail};
use clap::Subcommand;
use colored::*;
use convoy_core::MachineId;
use convoy_orchestrator::OrchestratorError;
use convoy_orchestrator::lookup::MachineLookup;

use crate::context::Context;

/// Machine subcommands
#[derive(Subcommand)]
pub enum MachineCommands {
    /// List machines in the inventory
    List,
    /// Open an SSH session to each machine and run a trivial command
    Test {
        /// Machine IDs (comma-separated); every machine when omitted
        #[arg(value_delimiter = ',')]
        ids: Vec<MachineId>,
    },
}

pub async fn handle_machine_command(command: MachineCommands, ctx: &Context) -> Result<()> {
    match command {
        MachineCommands::List => list_machines(ctx).await,
        MachineCommands::Test { ids } => test_connections(ctx, ids).await,
    }
}

async fn list_machines(ctx: &Context) -> Result<()> {
    let ids = ctx.inventory.machine_ids();

    if ids.is_empty() {
        println!("{}", "No machines in the inventory.".yellow());
        return Ok(());
    }

    println!("{}", format!("Found {} machine(s):", ids.len()).bold());
    println!();
    for machine in ctx.inventory.get_machines(&ids).await? {
        println!(
            "  {} {:<4} {:<16} {}@{}:{}",
            "▸".cyan(),
            machine.id,
            machine.name,
            machine.username,
            machine.host,
            machine.port
        );
    }

    Ok(())
}

async fn test_connections(ctx: &Context, ids: Vec<MachineId>) -> Result<()> {
    let ids = if ids.is_empty() {
        ctx.inventory.machine_ids()
    } else {
        ids
    };

    let mut failed = 0;
    for machine in ctx.inventory.get_machines(&ids).await? {
        match ctx.orchestrator.test_connection(&machine).await {
            Ok(()) => println!("  {} {} ({})", "✓".green(), machine.name, machine.host),
            Err(e) => {
                failed += 1;
                println!("  {} {} ({}): {}", "✗".red(), machine.name, machine.host, e);
                if let OrchestratorError::Remote(remote) = &e {
                    println!("    {}", remote.hint().dimmed());
                }
            }
        }
    }

    if failed > 0 {
        bail!("{} of {} machine(s) unreachable", failed, ids.len());
    }

    Ok(())
}
