//! Task ledger domain types
//!
//! A [`Task`] records one orchestration operation over a set of machines; each
//! machine contributes an ordered sequence of [`TaskStep`]s.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::domain::lifecycle::OperationKind;
use crate::{MachineId, PipelineId};

/// Durable record of one orchestration operation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: Uuid,
    pub pipeline_id: PipelineId,
    pub operation: OperationKind,
    pub name: String,
    pub status: TaskStatus,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl Task {
    pub fn new(pipeline_id: PipelineId, operation: OperationKind) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            pipeline_id,
            operation,
            name: format!("{} pipeline {}", operation.verb(), pipeline_id),
            status: TaskStatus::Pending,
            error_message: None,
            created_at: now,
            updated_at: now,
            started_at: None,
            finished_at: None,
        }
    }
}

/// Overall status of a task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    Pending,
    Running,
    Success,
    Failed,
    PartialFailure,
}

impl TaskStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskStatus::Success | TaskStatus::Failed | TaskStatus::PartialFailure
        )
    }

    /// Folds per-machine step sequences into one task status
    ///
    /// `Success` iff every step succeeded, `Failed` iff every machine's sequence
    /// failed, `PartialFailure` otherwise. A task without steps ran nothing and
    /// is `Failed`.
    pub fn aggregate(steps: &[TaskStep]) -> TaskStatus {
        let mut per_machine: BTreeMap<MachineId, Vec<&TaskStep>> = BTreeMap::new();
        for step in steps {
            per_machine.entry(step.machine_id).or_default().push(step);
        }

        let outcomes: Vec<MachineOutcome> = per_machine
            .values()
            .map(|steps| MachineOutcome::of(steps.iter().copied()))
            .collect();

        Self::from_outcomes(&outcomes)
    }

    pub fn from_outcomes(outcomes: &[MachineOutcome]) -> TaskStatus {
        if outcomes.is_empty() {
            TaskStatus::Failed
        } else if outcomes.iter().all(|o| *o == MachineOutcome::Succeeded) {
            TaskStatus::Success
        } else if outcomes.iter().all(|o| *o == MachineOutcome::Failed) {
            TaskStatus::Failed
        } else {
            TaskStatus::PartialFailure
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TaskStatus::Pending => "PENDING",
            TaskStatus::Running => "RUNNING",
            TaskStatus::Success => "SUCCESS",
            TaskStatus::Failed => "FAILED",
            TaskStatus::PartialFailure => "PARTIAL_FAILURE",
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(TaskStatus::Pending),
            "RUNNING" => Ok(TaskStatus::Running),
            "SUCCESS" => Ok(TaskStatus::Success),
            "FAILED" => Ok(TaskStatus::Failed),
            "PARTIAL_FAILURE" => Ok(TaskStatus::PartialFailure),
            _ => Err(format!("Invalid task status: {s}")),
        }
    }
}

/// Result of one machine's step sequence
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MachineOutcome {
    Succeeded,
    Failed,
    /// Some steps have not finished
    Incomplete,
}

impl MachineOutcome {
    pub fn of<'a>(steps: impl IntoIterator<Item = &'a TaskStep>) -> MachineOutcome {
        let mut all_success = true;
        for step in steps {
            match step.status {
                StepStatus::Failed => return MachineOutcome::Failed,
                StepStatus::Success => {}
                _ => all_success = false,
            }
        }

        if all_success {
            MachineOutcome::Succeeded
        } else {
            MachineOutcome::Incomplete
        }
    }
}

/// One unit of progress within a task, scoped to one machine
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskStep {
    pub id: Uuid,
    pub task_id: Uuid,
    pub machine_id: MachineId,
    pub name: String,
    /// Position within the machine's sequence, starting at 0
    pub sequence: i32,
    pub status: StepStatus,
    pub output: Option<String>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
}

impl TaskStep {
    pub fn new(task_id: Uuid, machine_id: MachineId, name: impl Into<String>, sequence: i32) -> Self {
        Self {
            id: Uuid::new_v4(),
            task_id,
            machine_id,
            name: name.into(),
            sequence,
            status: StepStatus::Pending,
            output: None,
            error: None,
            created_at: Utc::now(),
            started_at: None,
            ended_at: None,
        }
    }
}

/// Status of a single step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StepStatus {
    Pending,
    Running,
    Success,
    Failed,
    Skipped,
}

impl StepStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            StepStatus::Success | StepStatus::Failed | StepStatus::Skipped
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            StepStatus::Pending => "PENDING",
            StepStatus::Running => "RUNNING",
            StepStatus::Success => "SUCCESS",
            StepStatus::Failed => "FAILED",
            StepStatus::Skipped => "SKIPPED",
        }
    }
}

impl fmt::Display for StepStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StepStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(StepStatus::Pending),
            "RUNNING" => Ok(StepStatus::Running),
            "SUCCESS" => Ok(StepStatus::Success),
            "FAILED" => Ok(StepStatus::Failed),
            "SKIPPED" => Ok(StepStatus::Skipped),
            _ => Err(format!("Invalid step status: {s}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn step(machine_id: MachineId, sequence: i32, status: StepStatus) -> TaskStep {
        let mut step = TaskStep::new(Uuid::nil(), machine_id, "step", sequence);
        step.status = status;
        step
    }

    #[test]
    fn test_aggregate_all_success() {
        let steps = vec![
            step(1, 0, StepStatus::Success),
            step(1, 1, StepStatus::Success),
            step(2, 0, StepStatus::Success),
        ];
        assert_eq!(TaskStatus::aggregate(&steps), TaskStatus::Success);
    }

    #[test]
    fn test_aggregate_every_machine_failed() {
        let steps = vec![
            step(1, 0, StepStatus::Failed),
            step(1, 1, StepStatus::Skipped),
            step(2, 0, StepStatus::Success),
            step(2, 1, StepStatus::Failed),
        ];
        assert_eq!(TaskStatus::aggregate(&steps), TaskStatus::Failed);
    }

    #[test]
    fn test_aggregate_one_bad_node() {
        let steps = vec![
            step(1, 0, StepStatus::Success),
            step(2, 0, StepStatus::Failed),
            step(2, 1, StepStatus::Skipped),
        ];
        assert_eq!(TaskStatus::aggregate(&steps), TaskStatus::PartialFailure);
    }

    #[test]
    fn test_aggregate_unfinished_machine_is_not_success() {
        let steps = vec![step(1, 0, StepStatus::Success), step(1, 1, StepStatus::Running)];
        assert_eq!(TaskStatus::aggregate(&steps), TaskStatus::PartialFailure);
    }

    #[test]
    fn test_aggregate_without_steps_is_failed() {
        assert_eq!(TaskStatus::aggregate(&[]), TaskStatus::Failed);
        assert_eq!(TaskStatus::from_outcomes(&[]), TaskStatus::Failed);
    }

    #[test]
    fn test_status_strings() {
        for status in [
            TaskStatus::Pending,
            TaskStatus::Running,
            TaskStatus::Success,
            TaskStatus::Failed,
            TaskStatus::PartialFailure,
        ] {
            assert_eq!(status.as_str().parse::<TaskStatus>().unwrap(), status);
        }
        assert_eq!("SKIPPED".parse::<StepStatus>().unwrap(), StepStatus::Skipped);
        assert!("DONE".parse::<StepStatus>().is_err());
    }
}
