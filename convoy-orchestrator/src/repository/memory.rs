//! In-memory repositories
//!
//! Process-local implementations of the ledger and state stores, used by tests
//! and by callers that do not need records to survive a restart.

use async_trait::async_trait;
use chrono::Utc;
use convoy_core::domain::lifecycle::MachineState;
use convoy_core::domain::machine::MachineAssignment;
use convoy_core::domain::task::{StepStatus, Task, TaskStatus, TaskStep};
use convoy_core::{MachineId, PipelineId};
use std::collections::BTreeMap;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::machine_state::{MachineStateRepository, assignment_not_found};
use super::task::TaskRepository;
use crate::error::Result;

/// In-memory implementation of TaskRepository
#[derive(Default)]
pub struct InMemoryTaskRepository {
    // Insertion order breaks ties between tasks created in the same instant
    tasks: RwLock<Vec<Task>>,
    steps: RwLock<Vec<TaskStep>>,
}

impl InMemoryTaskRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TaskRepository for InMemoryTaskRepository {
    async fn insert_task(&self, task: &Task) -> Result<()> {
        self.tasks.write().await.push(task.clone());
        Ok(())
    }

    async fn find_task(&self, id: Uuid) -> Result<Option<Task>> {
        Ok(self.tasks.read().await.iter().find(|t| t.id == id).cloned())
    }

    async fn list_tasks(&self, pipeline_id: PipelineId) -> Result<Vec<Task>> {
        let tasks = self.tasks.read().await;
        let mut matching: Vec<(usize, Task)> = tasks
            .iter()
            .enumerate()
            .filter(|(_, t)| t.pipeline_id == pipeline_id)
            .map(|(i, t)| (i, t.clone()))
            .collect();

        matching.sort_by(|(ia, a), (ib, b)| b.created_at.cmp(&a.created_at).then(ib.cmp(ia)));
        Ok(matching.into_iter().map(|(_, t)| t).collect())
    }

    async fn list_unfinished(&self) -> Result<Vec<Task>> {
        Ok(self
            .tasks
            .read()
            .await
            .iter()
            .filter(|t| !t.status.is_terminal())
            .cloned()
            .collect())
    }

    async fn update_task_status(
        &self,
        id: Uuid,
        status: TaskStatus,
        error_message: Option<String>,
    ) -> Result<bool> {
        let mut tasks = self.tasks.write().await;
        let Some(task) = tasks.iter_mut().find(|t| t.id == id) else {
            return Ok(false);
        };

        let now = Utc::now();
        task.status = status;
        task.updated_at = now;
        if error_message.is_some() {
            task.error_message = error_message;
        }
        if status == TaskStatus::Running && task.started_at.is_none() {
            task.started_at = Some(now);
        }
        if status.is_terminal() {
            task.finished_at = Some(now);
        }

        Ok(true)
    }

    async fn delete_task(&self, id: Uuid) -> Result<bool> {
        let mut tasks = self.tasks.write().await;
        let before = tasks.len();
        tasks.retain(|t| t.id != id);
        let removed = tasks.len() != before;

        if removed {
            self.steps.write().await.retain(|s| s.task_id != id);
        }

        Ok(removed)
    }

    async fn delete_tasks_for_pipeline(&self, pipeline_id: PipelineId) -> Result<u64> {
        let mut tasks = self.tasks.write().await;
        let removed: Vec<Uuid> = tasks
            .iter()
            .filter(|t| t.pipeline_id == pipeline_id)
            .map(|t| t.id)
            .collect();
        tasks.retain(|t| t.pipeline_id != pipeline_id);

        self.steps
            .write()
            .await
            .retain(|s| !removed.contains(&s.task_id));

        Ok(removed.len() as u64)
    }

    async fn insert_step(&self, step: &TaskStep) -> Result<()> {
        self.steps.write().await.push(step.clone());
        Ok(())
    }

    async fn find_steps(&self, task_id: Uuid) -> Result<Vec<TaskStep>> {
        let mut steps: Vec<TaskStep> = self
            .steps
            .read()
            .await
            .iter()
            .filter(|s| s.task_id == task_id)
            .cloned()
            .collect();

        steps.sort_by_key(|s| (s.machine_id, s.sequence));
        Ok(steps)
    }

    async fn update_step(
        &self,
        id: Uuid,
        status: StepStatus,
        output: Option<String>,
        error: Option<String>,
    ) -> Result<bool> {
        let mut steps = self.steps.write().await;
        let Some(step) = steps.iter_mut().find(|s| s.id == id) else {
            return Ok(false);
        };

        let now = Utc::now();
        step.status = status;
        if output.is_some() {
            step.output = output;
        }
        if error.is_some() {
            step.error = error;
        }
        if status == StepStatus::Running && step.started_at.is_none() {
            step.started_at = Some(now);
        }
        if status.is_terminal() {
            step.ended_at = Some(now);
        }

        Ok(true)
    }

    async fn skip_pending_steps(&self, task_id: Uuid, machine_id: MachineId) -> Result<u64> {
        let now = Utc::now();
        let mut skipped = 0;

        for step in self.steps.write().await.iter_mut() {
            if step.task_id == task_id
                && step.machine_id == machine_id
                && step.status == StepStatus::Pending
            {
                step.status = StepStatus::Skipped;
                step.ended_at = Some(now);
                skipped += 1;
            }
        }

        Ok(skipped)
    }

    async fn delete_steps(&self, task_id: Uuid) -> Result<u64> {
        let mut steps = self.steps.write().await;
        let before = steps.len();
        steps.retain(|s| s.task_id != task_id);
        Ok((before - steps.len()) as u64)
    }
}

/// In-memory implementation of MachineStateRepository
#[derive(Default)]
pub struct InMemoryMachineStateRepository {
    assignments: RwLock<BTreeMap<(PipelineId, MachineId), MachineAssignment>>,
}

impl InMemoryMachineStateRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MachineStateRepository for InMemoryMachineStateRepository {
    async fn get(
        &self,
        pipeline_id: PipelineId,
        machine_id: MachineId,
    ) -> Result<Option<MachineAssignment>> {
        Ok(self
            .assignments
            .read()
            .await
            .get(&(pipeline_id, machine_id))
            .cloned())
    }

    async fn create(
        &self,
        pipeline_id: PipelineId,
        machine_id: MachineId,
    ) -> Result<MachineAssignment> {
        Ok(self
            .assignments
            .write()
            .await
            .entry((pipeline_id, machine_id))
            .or_insert_with(|| MachineAssignment::new(pipeline_id, machine_id))
            .clone())
    }

    async fn set_state(
        &self,
        pipeline_id: PipelineId,
        machine_id: MachineId,
        state: MachineState,
    ) -> Result<()> {
        let mut assignments = self.assignments.write().await;
        let assignment = assignments
            .get_mut(&(pipeline_id, machine_id))
            .ok_or_else(|| assignment_not_found(pipeline_id, machine_id))?;

        assignment.state = state;
        if state.clears_pid() {
            assignment.process_pid = None;
        }
        assignment.updated_at = Utc::now();

        Ok(())
    }

    async fn set_pid(
        &self,
        pipeline_id: PipelineId,
        machine_id: MachineId,
        pid: Option<String>,
    ) -> Result<()> {
        let mut assignments = self.assignments.write().await;
        let assignment = assignments
            .get_mut(&(pipeline_id, machine_id))
            .ok_or_else(|| assignment_not_found(pipeline_id, machine_id))?;

        assignment.process_pid = pid;
        assignment.updated_at = Utc::now();

        Ok(())
    }

    async fn list_for_pipeline(&self, pipeline_id: PipelineId) -> Result<Vec<MachineAssignment>> {
        Ok(self
            .assignments
            .read()
            .await
            .values()
            .filter(|a| a.pipeline_id == pipeline_id)
            .cloned()
            .collect())
    }

    async fn list_all(&self) -> Result<Vec<MachineAssignment>> {
        Ok(self.assignments.read().await.values().cloned().collect())
    }

    async fn delete(&self, pipeline_id: PipelineId, machine_id: MachineId) -> Result<bool> {
        Ok(self
            .assignments
            .write()
            .await
            .remove(&(pipeline_id, machine_id))
            .is_some())
    }
}
