//! Task Ledger
//!
//! Durable record of every orchestration operation and its per-machine steps.
//! The orchestrator is the only writer; readers poll it for progress.

use convoy_core::domain::lifecycle::OperationKind;
use convoy_core::domain::task::{StepStatus, Task, TaskStatus, TaskStep};
use convoy_core::dto::task::TaskDetail;
use convoy_core::{MachineId, PipelineId};
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::{OrchestratorError, Result};
use crate::repository::TaskRepository;

#[derive(Clone)]
pub struct TaskLedger {
    repo: Arc<dyn TaskRepository>,
}

impl TaskLedger {
    pub fn new(repo: Arc<dyn TaskRepository>) -> Self {
        Self { repo }
    }

    /// Creates a `Pending` task for an operation on a pipeline
    pub async fn create_task(&self, pipeline_id: PipelineId, operation: OperationKind) -> Result<Uuid> {
        let task = Task::new(pipeline_id, operation);
        self.record_task(&task).await?;
        Ok(task.id)
    }

    /// Stores a task built by the caller, whose id may already be claimed
    pub async fn record_task(&self, task: &Task) -> Result<()> {
        self.repo.insert_task(task).await?;

        info!(task_id = %task.id, pipeline_id = task.pipeline_id, "Task created: {}", task.name);
        Ok(())
    }

    /// Declares the next step of a machine's sequence as `Pending`
    pub async fn append_step(
        &self,
        task_id: Uuid,
        machine_id: MachineId,
        step_name: &str,
    ) -> Result<Uuid> {
        let sequence = self
            .repo
            .find_steps(task_id)
            .await?
            .iter()
            .filter(|s| s.machine_id == machine_id)
            .count() as i32;

        let step = TaskStep::new(task_id, machine_id, step_name, sequence);
        self.repo.insert_step(&step).await?;

        debug!(%task_id, machine_id, step = step_name, sequence, "Step declared");
        Ok(step.id)
    }

    /// Declares a whole step sequence for one machine, in order
    pub async fn declare_steps(
        &self,
        task_id: Uuid,
        machine_id: MachineId,
        step_names: &[&str],
    ) -> Result<Vec<Uuid>> {
        let offset = self
            .repo
            .find_steps(task_id)
            .await?
            .iter()
            .filter(|s| s.machine_id == machine_id)
            .count() as i32;

        let mut ids = Vec::with_capacity(step_names.len());
        for (index, name) in step_names.iter().enumerate() {
            let step = TaskStep::new(task_id, machine_id, *name, offset + index as i32);
            self.repo.insert_step(&step).await?;
            ids.push(step.id);
        }

        debug!(%task_id, machine_id, "Declared {} step(s)", ids.len());
        Ok(ids)
    }

    /// Records progress of a step
    ///
    /// `detail` is stored as the step output on success and as the step error
    /// on failure.
    pub async fn update_step(
        &self,
        step_id: Uuid,
        status: StepStatus,
        detail: Option<String>,
    ) -> Result<()> {
        let (output, error) = match status {
            StepStatus::Failed => (None, detail),
            _ => (detail, None),
        };

        if !self.repo.update_step(step_id, status, output, error).await? {
            return Err(OrchestratorError::not_found("task step", step_id));
        }

        Ok(())
    }

    pub async fn mark_task_running(&self, task_id: Uuid) -> Result<()> {
        self.set_task_status(task_id, TaskStatus::Running, None).await
    }

    /// Stores the overall outcome of a task
    pub async fn finalize_task(
        &self,
        task_id: Uuid,
        status: TaskStatus,
        error_message: Option<String>,
    ) -> Result<()> {
        self.set_task_status(task_id, status, error_message).await?;
        info!(%task_id, "Task finished with status {}", status);
        Ok(())
    }

    async fn set_task_status(
        &self,
        task_id: Uuid,
        status: TaskStatus,
        error_message: Option<String>,
    ) -> Result<()> {
        if !self
            .repo
            .update_task_status(task_id, status, error_message)
            .await?
        {
            return Err(OrchestratorError::not_found("task", task_id));
        }
        Ok(())
    }

    /// Skips every step of a machine that has not started yet
    pub async fn skip_remaining_steps(&self, task_id: Uuid, machine_id: MachineId) -> Result<u64> {
        self.repo.skip_pending_steps(task_id, machine_id).await
    }

    /// Folds the recorded steps of a task into its overall status
    pub async fn aggregate_status(&self, task_id: Uuid) -> Result<TaskStatus> {
        let steps = self.repo.find_steps(task_id).await?;
        Ok(TaskStatus::aggregate(&steps))
    }

    pub async fn get_task(&self, task_id: Uuid) -> Result<Task> {
        self.repo
            .find_task(task_id)
            .await?
            .ok_or_else(|| OrchestratorError::not_found("task", task_id))
    }

    pub async fn get_task_detail(&self, task_id: Uuid) -> Result<TaskDetail> {
        let task = self.get_task(task_id).await?;
        let steps = self.repo.find_steps(task_id).await?;
        Ok(TaskDetail::new(task, steps))
    }

    /// The most recently created task of a pipeline, with its steps
    pub async fn get_latest_task(&self, pipeline_id: PipelineId) -> Result<Option<TaskDetail>> {
        let Some(task) = self.repo.list_tasks(pipeline_id).await?.into_iter().next() else {
            return Ok(None);
        };

        let steps = self.repo.find_steps(task.id).await?;
        Ok(Some(TaskDetail::new(task, steps)))
    }

    /// Tasks of a pipeline, newest first
    pub async fn list_tasks(&self, pipeline_id: PipelineId) -> Result<Vec<Task>> {
        self.repo.list_tasks(pipeline_id).await
    }

    pub async fn list_task_ids(&self, pipeline_id: PipelineId) -> Result<Vec<Uuid>> {
        Ok(self
            .repo
            .list_tasks(pipeline_id)
            .await?
            .into_iter()
            .map(|t| t.id)
            .collect())
    }

    pub async fn list_unfinished(&self) -> Result<Vec<Task>> {
        self.repo.list_unfinished().await
    }

    pub async fn get_steps(&self, task_id: Uuid) -> Result<Vec<TaskStep>> {
        self.repo.find_steps(task_id).await
    }

    /// Whether any task of this operation ever declared steps for the machine
    pub async fn has_history(
        &self,
        pipeline_id: PipelineId,
        machine_id: MachineId,
        operation: OperationKind,
    ) -> Result<bool> {
        for task in self.repo.list_tasks(pipeline_id).await? {
            if task.operation != operation {
                continue;
            }
            let steps = self.repo.find_steps(task.id).await?;
            if steps.iter().any(|s| s.machine_id == machine_id) {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Deletes a task and its steps
    pub async fn delete_task(&self, task_id: Uuid) -> Result<bool> {
        let deleted = self.repo.delete_task(task_id).await?;
        if deleted {
            info!(%task_id, "Task deleted");
        }
        Ok(deleted)
    }

    pub async fn delete_steps(&self, task_id: Uuid) -> Result<u64> {
        self.repo.delete_steps(task_id).await
    }

    pub async fn delete_tasks_for_pipeline(&self, pipeline_id: PipelineId) -> Result<u64> {
        let deleted = self.repo.delete_tasks_for_pipeline(pipeline_id).await?;
        info!(pipeline_id, "Deleted {} task(s)", deleted);
        Ok(deleted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::InMemoryTaskRepository;

    fn ledger() -> TaskLedger {
        TaskLedger::new(Arc::new(InMemoryTaskRepository::new()))
    }

    #[tokio::test]
    async fn test_append_step_assigns_sequence_per_machine() {
        let ledger = ledger();
        let task_id = ledger.create_task(1, OperationKind::Start).await.unwrap();

        ledger.append_step(task_id, 10, "start-process").await.unwrap();
        ledger.append_step(task_id, 20, "start-process").await.unwrap();
        ledger.append_step(task_id, 10, "verify-process").await.unwrap();

        let detail = ledger.get_task_detail(task_id).await.unwrap();
        let sequences: Vec<(String, i32)> = detail
            .steps_for(10)
            .iter()
            .map(|s| (s.name.clone(), s.sequence))
            .collect();
        assert_eq!(
            sequences,
            vec![
                ("start-process".to_string(), 0),
                ("verify-process".to_string(), 1)
            ]
        );
        assert_eq!(detail.steps_for(20).len(), 1);
    }

    #[tokio::test]
    async fn test_failed_step_stores_error() {
        let ledger = ledger();
        let task_id = ledger.create_task(1, OperationKind::Stop).await.unwrap();
        let step_id = ledger.append_step(task_id, 10, "stop-process").await.unwrap();

        ledger
            .update_step(step_id, StepStatus::Failed, Some("permission denied".into()))
            .await
            .unwrap();

        let steps = ledger.get_steps(task_id).await.unwrap();
        assert_eq!(steps[0].error.as_deref(), Some("permission denied"));
        assert_eq!(steps[0].output, None);
    }

    #[tokio::test]
    async fn test_finalize_and_latest_task() {
        let ledger = ledger();
        assert!(ledger.get_latest_task(1).await.unwrap().is_none());

        let first = ledger.create_task(1, OperationKind::Initialize).await.unwrap();
        ledger.finalize_task(first, TaskStatus::Success, None).await.unwrap();
        let second = ledger.create_task(1, OperationKind::Start).await.unwrap();

        let latest = ledger.get_latest_task(1).await.unwrap().unwrap();
        assert_eq!(latest.task.id, second);
        assert_eq!(ledger.list_task_ids(1).await.unwrap(), vec![second, first]);

        let task = ledger.get_task(first).await.unwrap();
        assert_eq!(task.status, TaskStatus::Success);
        assert!(task.finished_at.is_some());
    }

    #[tokio::test]
    async fn test_delete_task_removes_it_from_listing() {
        let ledger = ledger();
        let task_id = ledger.create_task(1, OperationKind::Stop).await.unwrap();
        ledger.append_step(task_id, 10, "stop-process").await.unwrap();

        assert!(ledger.delete_task(task_id).await.unwrap());
        assert!(ledger.list_task_ids(1).await.unwrap().is_empty());
        assert!(ledger.get_steps(task_id).await.unwrap().is_empty());
        assert!(matches!(
            ledger.get_task(task_id).await,
            Err(OrchestratorError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_record_task_keeps_caller_id() {
        let ledger = ledger();
        let task = Task::new(1, OperationKind::Start);
        ledger.record_task(&task).await.unwrap();

        let stored = ledger.get_task(task.id).await.unwrap();
        assert_eq!(stored.status, TaskStatus::Pending);
        assert_eq!(stored.name, task.name);
    }

    #[tokio::test]
    async fn test_has_history() {
        let ledger = ledger();
        let task_id = ledger.create_task(1, OperationKind::Initialize).await.unwrap();
        ledger.append_step(task_id, 10, "create-remote-dir").await.unwrap();

        assert!(ledger.has_history(1, 10, OperationKind::Initialize).await.unwrap());
        assert!(!ledger.has_history(1, 20, OperationKind::Initialize).await.unwrap());
        assert!(!ledger.has_history(1, 10, OperationKind::Start).await.unwrap());
    }
}
