//! Task command handlers
//!
//! Reads and prunes the task ledger of a pipeline.

use anyhow::Result;
use clap::Subcommand;
use colored::*;
use convoy_core::PipelineId;
use convoy_core::dto::task::TaskSummary;

use super::display::{print_task_details, print_task_summary};
use crate::context::Context;
use crate::id_resolver::resolve_task_id;
use crate::types::IdOrPrefix;

/// Task subcommands
#[derive(Subcommand)]
pub enum TaskCommands {
    /// List tasks of a pipeline, newest first
    List {
        pipeline_id: PipelineId,

        /// Print as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show a task with its steps
    Get {
        pipeline_id: PipelineId,

        /// Task ID or unambiguous prefix; the latest task when omitted
        id: Option<String>,
    },
    /// Delete a task and its steps
    Delete {
        pipeline_id: PipelineId,

        /// Task ID or unambiguous prefix
        id: String,
    },
    /// Delete every task of a pipeline
    Purge { pipeline_id: PipelineId },
}

pub async fn handle_task_command(command: TaskCommands, ctx: &Context) -> Result<()> {
    match command {
        TaskCommands::List { pipeline_id, json } => list_tasks(ctx, pipeline_id, json).await,
        TaskCommands::Get { pipeline_id, id } => get_task(ctx, pipeline_id, id).await,
        TaskCommands::Delete { pipeline_id, id } => delete_task(ctx, pipeline_id, &id).await,
        TaskCommands::Purge { pipeline_id } => purge_tasks(ctx, pipeline_id).await,
    }
}

async fn list_tasks(ctx: &Context, pipeline_id: PipelineId, json: bool) -> Result<()> {
    let tasks = ctx.orchestrator.tasks(pipeline_id).await?;

    if json {
        let summaries: Vec<TaskSummary> = tasks.iter().map(TaskSummary::from).collect();
        println!("{}", serde_json::to_string_pretty(&summaries)?);
        return Ok(());
    }

    if tasks.is_empty() {
        println!(
            "{}",
            format!("No tasks found for pipeline {}.", pipeline_id).yellow()
        );
    } else {
        println!(
            "{}",
            format!("Found {} task(s) for pipeline {}:", tasks.len(), pipeline_id).bold()
        );
        println!();
        for task in &tasks {
            print_task_summary(task);
        }
    }

    Ok(())
}

async fn get_task(ctx: &Context, pipeline_id: PipelineId, id: Option<String>) -> Result<()> {
    let detail = match id {
        Some(id) => {
            let task_id = resolve_task_id(&ctx.orchestrator, pipeline_id, &IdOrPrefix::parse(&id)).await?;
            ctx.orchestrator.task_detail(task_id).await?
        }
        None => match ctx.orchestrator.latest_task(pipeline_id).await? {
            Some(detail) => detail,
            None => {
                println!(
                    "{}",
                    format!("No tasks found for pipeline {}.", pipeline_id).yellow()
                );
                return Ok(());
            }
        },
    };

    print_task_details(&detail);
    Ok(())
}

async fn delete_task(ctx: &Context, pipeline_id: PipelineId, id: &str) -> Result<()> {
    let task_id = resolve_task_id(&ctx.orchestrator, pipeline_id, &IdOrPrefix::parse(id)).await?;

    if ctx.orchestrator.delete_task(task_id).await? {
        println!("{}", format!("✓ Task {} deleted", task_id).green());
    } else {
        println!("{}", format!("Task {} was already gone.", task_id).yellow());
    }

    Ok(())
}

async fn purge_tasks(ctx: &Context, pipeline_id: PipelineId) -> Result<()> {
    let deleted = ctx.orchestrator.delete_pipeline_tasks(pipeline_id).await?;
    println!(
        "{}",
        format!("✓ Deleted {} task(s) of pipeline {}", deleted, pipeline_id).green()
    );
    Ok(())
}
