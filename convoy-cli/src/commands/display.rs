//! Terminal rendering shared by the command handlers

use colored::*;
use convoy_core::domain::lifecycle::MachineState;
use convoy_core::domain::task::{StepStatus, Task, TaskStatus, TaskStep};
use convoy_core::dto::task::TaskDetail;

const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

pub fn colorize_task_status(status: TaskStatus) -> ColoredString {
    let text = status.as_str();
    match status {
        TaskStatus::Pending => text.yellow(),
        TaskStatus::Running => text.cyan(),
        TaskStatus::Success => text.green(),
        TaskStatus::Failed => text.red(),
        TaskStatus::PartialFailure => text.magenta(),
    }
}

pub fn colorize_step_status(status: StepStatus) -> ColoredString {
    let text = status.as_str();
    match status {
        StepStatus::Pending => text.dimmed(),
        StepStatus::Running => text.cyan(),
        StepStatus::Success => text.green(),
        StepStatus::Failed => text.red(),
        StepStatus::Skipped => text.yellow(),
    }
}

pub fn colorize_machine_state(state: MachineState) -> ColoredString {
    let text = state.as_str();
    if state.is_failure() {
        text.red()
    } else if state.is_in_progress() {
        text.cyan()
    } else if state == MachineState::Running {
        text.green()
    } else {
        text.normal()
    }
}

/// One line per step transition while following an operation
pub fn print_step_progress(step: &TaskStep) {
    let mut line = format!(
        "  {} machine {:<4} {:<22} {}",
        "▸".cyan(),
        step.machine_id,
        step.name,
        colorize_step_status(step.status)
    );
    if let Some(error) = &step.error {
        line.push_str(&format!("  {}", error.red()));
    }
    println!("{}", line);
}

pub fn print_task_summary(task: &Task) {
    println!("  {} Task {}", "▸".cyan(), task.id.to_string().dimmed());
    println!("    Operation: {}", task.operation);
    println!("    Status:    {}", colorize_task_status(task.status));
    println!(
        "    Created:   {}",
        task.created_at.format(TIME_FORMAT).to_string().dimmed()
    );
    println!();
}

pub fn print_task_details(detail: &TaskDetail) {
    let task = &detail.task;

    println!("{}", "Task Details:".bold());
    println!("  ID:          {}", task.id.to_string().cyan());
    println!("  Name:        {}", task.name);
    println!("  Pipeline ID: {}", task.pipeline_id.to_string().dimmed());
    println!("  Status:      {}", colorize_task_status(task.status));
    println!("  Created:     {}", task.created_at.format(TIME_FORMAT));

    if let Some(started) = task.started_at {
        println!("  Started:     {}", started.format(TIME_FORMAT));
    }

    if let Some(finished) = task.finished_at {
        println!("  Finished:    {}", finished.format(TIME_FORMAT));
        if let Some(started) = task.started_at {
            let seconds = finished.signed_duration_since(started).num_seconds();
            println!("  Duration:    {}s", seconds);
        }
    }

    let stats = &detail.stats;
    println!(
        "  Steps:       {} total, {} succeeded, {} failed, {} skipped",
        stats.total(),
        stats.success.to_string().green(),
        stats.failed.to_string().red(),
        stats.skipped.to_string().yellow()
    );

    for machine in &detail.machines {
        println!("\n{}", format!("Machine {}:", machine.machine_id).bold());
        for step in &machine.steps {
            println!(
                "  {:>2}. {:<22} {}",
                step.sequence + 1,
                step.name,
                colorize_step_status(step.status)
            );
            if let Some(output) = step.output.as_deref().filter(|o| !o.is_empty()) {
                println!("      {}", output.dimmed());
            }
            if let Some(error) = &step.error {
                println!("      {}", error.red());
            }
        }
    }

    if let Some(error) = &task.error_message {
        println!("\n{}", "Error:".bold());
        println!("{}", error.red());
    }
}
