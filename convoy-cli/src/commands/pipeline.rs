//! Pipeline command handlers
//!
//! Runs lifecycle operations on a pipeline across machines and follows their
//! progress in the task ledger until they finish.

use anyhow::{Context as _, Result, bail};
use clap::{Args, Subcommand};
use colored::*;
use convoy_core::domain::pipeline::ConfigUpdate;
use convoy_core::domain::task::{StepStatus, TaskStatus};
use convoy_core::{MachineId, PipelineId};
use convoy_orchestrator::lookup::{MachineLookup, PipelineLookup};
use convoy_orchestrator::{OperationHandle, Orchestrator};
use std::collections::HashMap;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::time::Duration;
use uuid::Uuid;

use super::display::{colorize_machine_state, print_step_progress, print_task_details};
use crate::context::Context;

const POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Pipeline and machines an operation targets
#[derive(Args)]
pub struct Selection {
    /// Pipeline ID from the inventory
    pipeline_id: PipelineId,

    /// Machine IDs from the inventory (comma-separated)
    #[arg(short, long, value_delimiter = ',', required = true)]
    machines: Vec<MachineId>,

    /// Only print the final result
    #[arg(short, long)]
    quiet: bool,
}

/// Pipeline subcommands
#[derive(Subcommand)]
pub enum PipelineCommands {
    /// List pipelines in the inventory
    List,
    /// Deploy package and configuration to machines
    Initialize(Selection),
    /// Launch the pipeline process on machines
    Start(Selection),
    /// Stop the pipeline process on machines
    Stop(Selection),
    /// Kill the pipeline process on machines without a grace period
    ForceStop(Selection),
    /// Push new configuration files to deployed machines
    UpdateConfig {
        #[command(flatten)]
        selection: Selection,

        /// Main pipeline configuration file
        #[arg(long)]
        config: Option<PathBuf>,

        /// JVM options file
        #[arg(long)]
        jvm_options: Option<PathBuf>,

        /// Process settings file (logstash.yml)
        #[arg(long)]
        system_config: Option<PathBuf>,
    },
    /// Rewrite configuration files on machines from the inventory
    RefreshConfig(Selection),
    /// Remove the deployment directory from machines
    DeleteDir(Selection),
    /// Show the lifecycle state on every assigned machine
    Status {
        /// Pipeline ID from the inventory
        pipeline_id: PipelineId,
    },
}

pub async fn handle_pipeline_command(command: PipelineCommands, ctx: &Context) -> Result<()> {
    match command {
        PipelineCommands::List => list_pipelines(ctx).await,
        PipelineCommands::Initialize(sel) => {
            let pipeline = ctx.inventory.get_pipeline(sel.pipeline_id).await?;
            let machines = ctx.inventory.get_machines(&sel.machines).await?;
            let handle = ctx.orchestrator.initialize(pipeline, machines).await?;
            run_to_completion(ctx, handle, sel.quiet).await
        }
        PipelineCommands::Start(sel) => {
            let pipeline = ctx.inventory.get_pipeline(sel.pipeline_id).await?;
            let machines = ctx.inventory.get_machines(&sel.machines).await?;
            let handle = ctx.orchestrator.start(pipeline, machines).await?;
            run_to_completion(ctx, handle, sel.quiet).await
        }
        PipelineCommands::Stop(sel) => {
            let machines = ctx.inventory.get_machines(&sel.machines).await?;
            let handle = ctx.orchestrator.stop(sel.pipeline_id, machines).await?;
            run_to_completion(ctx, handle, sel.quiet).await
        }
        PipelineCommands::ForceStop(sel) => {
            let machines = ctx.inventory.get_machines(&sel.machines).await?;
            let handle = ctx.orchestrator.force_stop(sel.pipeline_id, machines).await?;
            run_to_completion(ctx, handle, sel.quiet).await
        }
        PipelineCommands::UpdateConfig {
            selection,
            config,
            jvm_options,
            system_config,
        } => {
            let update = ConfigUpdate {
                config_content: read_optional(config.as_deref()).await?,
                jvm_options: read_optional(jvm_options.as_deref()).await?,
                system_config: read_optional(system_config.as_deref()).await?,
            };
            if update.is_empty() {
                bail!("nothing to update: pass --config, --jvm-options or --system-config");
            }
            let machines = ctx.inventory.get_machines(&selection.machines).await?;
            let handle = ctx
                .orchestrator
                .update_config(selection.pipeline_id, machines, update)
                .await?;
            run_to_completion(ctx, handle, selection.quiet).await
        }
        PipelineCommands::RefreshConfig(sel) => {
            let machines = ctx.inventory.get_machines(&sel.machines).await?;
            let handle = ctx.orchestrator.refresh_config(sel.pipeline_id, machines).await?;
            run_to_completion(ctx, handle, sel.quiet).await
        }
        PipelineCommands::DeleteDir(sel) => delete_dir(ctx, sel).await,
        PipelineCommands::Status { pipeline_id } => show_status(ctx, pipeline_id).await,
    }
}

async fn list_pipelines(ctx: &Context) -> Result<()> {
    let ids = ctx.inventory.pipeline_ids();

    if ids.is_empty() {
        println!("{}", "No pipelines in the inventory.".yellow());
        return Ok(());
    }

    println!("{}", format!("Found {} pipeline(s):", ids.len()).bold());
    println!();
    for id in ids {
        let pipeline = ctx.inventory.get_pipeline(id).await?;
        println!("  {} {} {}", "▸".cyan(), id.to_string().bold(), pipeline.name);
        println!("    Module:  {}", pipeline.module);
        println!("    Package: {}", pipeline.package_path.dimmed());
    }

    Ok(())
}

/// Follows an operation, prints its task and fails unless every machine succeeded
async fn run_to_completion(ctx: &Context, handle: OperationHandle, quiet: bool) -> Result<()> {
    let task_id = handle.task_id;
    let operation = handle.operation;
    let pipeline_id = handle.pipeline_id;

    println!(
        "{} {} on pipeline {} (task {})",
        "→".cyan(),
        operation.to_string().bold(),
        pipeline_id,
        task_id.to_string().dimmed()
    );

    let status = follow(&ctx.orchestrator, task_id, quiet, handle.outcome()).await?;

    println!();
    print_task_details(&ctx.orchestrator.task_detail(task_id).await?);

    if status != TaskStatus::Success {
        bail!("{} on pipeline {} finished {}", operation, pipeline_id, status);
    }

    println!("\n{}", format!("✓ {} succeeded on every machine", operation).green());
    Ok(())
}

async fn read_optional(path: Option<&Path>) -> Result<Option<String>> {
    let Some(path) = path else {
        return Ok(None);
    };
    let content = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("failed to read {}", path.display()))?;
    Ok(Some(content))
}

async fn delete_dir(ctx: &Context, sel: Selection) -> Result<()> {
    let machines = ctx.inventory.get_machines(&sel.machines).await?;
    let deferred = ctx
        .orchestrator
        .delete_directory(sel.pipeline_id, machines)
        .await?;
    let task_id = deferred.task_id();

    let removed = follow(&ctx.orchestrator, task_id, sel.quiet, deferred.wait()).await?;

    if removed {
        println!(
            "{}",
            format!("✓ Deployment directory removed from {} machine(s)", sel.machines.len())
                .green()
        );
        Ok(())
    } else {
        print_task_details(&ctx.orchestrator.task_detail(task_id).await?);
        bail!(
            "deployment directory of pipeline {} could not be removed everywhere",
            sel.pipeline_id
        )
    }
}

/// Awaits `done` while printing step transitions read back from the ledger
async fn follow<T>(
    orchestrator: &Orchestrator,
    task_id: Uuid,
    quiet: bool,
    done: impl Future<Output = convoy_orchestrator::Result<T>>,
) -> Result<T> {
    let mut done = std::pin::pin!(done);
    let mut ticker = tokio::time::interval(POLL_INTERVAL);
    let mut seen: HashMap<Uuid, StepStatus> = HashMap::new();

    loop {
        tokio::select! {
            result = &mut done => {
                if !quiet {
                    print_transitions(orchestrator, task_id, &mut seen).await;
                }
                return Ok(result?);
            }
            _ = ticker.tick(), if !quiet => {
                print_transitions(orchestrator, task_id, &mut seen).await;
            }
        }
    }
}

async fn print_transitions(
    orchestrator: &Orchestrator,
    task_id: Uuid,
    seen: &mut HashMap<Uuid, StepStatus>,
) {
    // Progress is best effort; the final detail is read once the task is done
    let Ok(steps) = orchestrator.ledger().get_steps(task_id).await else {
        return;
    };

    for step in steps {
        if step.status == StepStatus::Pending || seen.get(&step.id) == Some(&step.status) {
            continue;
        }
        seen.insert(step.id, step.status);
        print_step_progress(&step);
    }
}

async fn show_status(ctx: &Context, pipeline_id: PipelineId) -> Result<()> {
    let pipeline = ctx.inventory.get_pipeline(pipeline_id).await?;
    let assignments = ctx.orchestrator.pipeline_status(pipeline_id).await?;

    if assignments.is_empty() {
        println!(
            "{}",
            format!("Pipeline {} is not assigned to any machine.", pipeline_id).yellow()
        );
        return Ok(());
    }

    println!(
        "{}",
        format!("Pipeline {} ({}):", pipeline_id, pipeline.name).bold()
    );
    for assignment in assignments {
        let host = match ctx.inventory.find_machine(assignment.machine_id).await? {
            Some(machine) => machine.host,
            None => "-".to_string(),
        };
        println!(
            "  {} machine {:<4} {:<18} {:<18} pid {}",
            "▸".cyan(),
            assignment.machine_id,
            host,
            colorize_machine_state(assignment.state),
            assignment.process_pid.as_deref().unwrap_or("-").dimmed()
        );
    }

    Ok(())
}
