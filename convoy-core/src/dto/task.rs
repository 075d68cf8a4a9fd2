//! Task DTOs
//!
//! Views of a task and its steps grouped per machine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

use crate::MachineId;
use crate::domain::lifecycle::OperationKind;
use crate::domain::task::{MachineOutcome, StepStatus, Task, TaskStatus, TaskStep};

/// A task together with all of its steps
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskDetail {
    pub task: Task,

    /// Steps grouped by machine, each group in execution order
    pub machines: Vec<MachineSteps>,

    /// Step counts across all machines
    pub stats: StepStats,
}

impl TaskDetail {
    pub fn new(task: Task, steps: Vec<TaskStep>) -> Self {
        let stats = StepStats::from_steps(&steps);

        let mut grouped: BTreeMap<MachineId, Vec<TaskStep>> = BTreeMap::new();
        for step in steps {
            grouped.entry(step.machine_id).or_default().push(step);
        }

        let machines = grouped
            .into_iter()
            .map(|(machine_id, mut steps)| {
                steps.sort_by_key(|s| s.sequence);
                let outcome = MachineOutcome::of(&steps);
                MachineSteps {
                    machine_id,
                    outcome,
                    steps,
                }
            })
            .collect();

        Self {
            task,
            machines,
            stats,
        }
    }

    /// Steps of one machine, in execution order
    pub fn steps_for(&self, machine_id: MachineId) -> &[TaskStep] {
        self.machines
            .iter()
            .find(|m| m.machine_id == machine_id)
            .map(|m| m.steps.as_slice())
            .unwrap_or(&[])
    }

    pub fn all_steps(&self) -> impl Iterator<Item = &TaskStep> {
        self.machines.iter().flat_map(|m| m.steps.iter())
    }
}

/// One machine's ordered step sequence within a task
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MachineSteps {
    pub machine_id: MachineId,
    pub outcome: MachineOutcome,
    pub steps: Vec<TaskStep>,
}

/// Per-status step counts
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepStats {
    pub pending: usize,
    pub running: usize,
    pub success: usize,
    pub failed: usize,
    pub skipped: usize,
}

impl StepStats {
    pub fn from_steps<'a>(steps: impl IntoIterator<Item = &'a TaskStep>) -> Self {
        let mut stats = StepStats::default();
        for step in steps {
            match step.status {
                StepStatus::Pending => stats.pending += 1,
                StepStatus::Running => stats.running += 1,
                StepStatus::Success => stats.success += 1,
                StepStatus::Failed => stats.failed += 1,
                StepStatus::Skipped => stats.skipped += 1,
            }
        }
        stats
    }

    pub fn total(&self) -> usize {
        self.pending + self.running + self.success + self.failed + self.skipped
    }
}

/// Summary information about a task
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskSummary {
    pub id: Uuid,
    pub operation: OperationKind,
    pub status: TaskStatus,
    pub created_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl From<&Task> for TaskSummary {
    fn from(task: &Task) -> Self {
        TaskSummary {
            id: task.id,
            operation: task.operation,
            status: task.status,
            created_at: task.created_at,
            finished_at: task.finished_at,
        }
    }
}
