//! Task Repository
//!
//! Persistence of tasks and their steps.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use convoy_core::MachineId;
use convoy_core::PipelineId;
use convoy_core::domain::lifecycle::OperationKind;
use convoy_core::domain::task::{StepStatus, Task, TaskStatus, TaskStep};
use sqlx::PgPool;
use uuid::Uuid;

use crate::error::Result;

/// Storage for tasks and task steps
///
/// Implementations stamp `updated_at` on every write, `started_at` when a
/// record first becomes `Running` and the end timestamp when it reaches a
/// terminal status.
#[async_trait]
pub trait TaskRepository: Send + Sync {
    async fn insert_task(&self, task: &Task) -> Result<()>;

    async fn find_task(&self, id: Uuid) -> Result<Option<Task>>;

    /// Tasks of a pipeline, newest first
    async fn list_tasks(&self, pipeline_id: PipelineId) -> Result<Vec<Task>>;

    /// Tasks still `Pending` or `Running`
    async fn list_unfinished(&self) -> Result<Vec<Task>>;

    /// Returns false when the task does not exist
    async fn update_task_status(
        &self,
        id: Uuid,
        status: TaskStatus,
        error_message: Option<String>,
    ) -> Result<bool>;

    /// Deletes a task together with its steps
    async fn delete_task(&self, id: Uuid) -> Result<bool>;

    async fn delete_tasks_for_pipeline(&self, pipeline_id: PipelineId) -> Result<u64>;

    async fn insert_step(&self, step: &TaskStep) -> Result<()>;

    /// Steps of a task ordered by machine, then sequence
    async fn find_steps(&self, task_id: Uuid) -> Result<Vec<TaskStep>>;

    /// Returns false when the step does not exist
    async fn update_step(
        &self,
        id: Uuid,
        status: StepStatus,
        output: Option<String>,
        error: Option<String>,
    ) -> Result<bool>;

    /// Marks every `Pending` step of one machine as `Skipped`
    async fn skip_pending_steps(&self, task_id: Uuid, machine_id: MachineId) -> Result<u64>;

    async fn delete_steps(&self, task_id: Uuid) -> Result<u64>;
}

/// Postgres implementation of TaskRepository
pub struct PgTaskRepository {
    pool: PgPool,
}

impl PgTaskRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl TaskRepository for PgTaskRepository {
    async fn insert_task(&self, task: &Task) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO tasks (id, pipeline_id, operation, name, status, error_message,
                               created_at, updated_at, started_at, finished_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(task.id)
        .bind(task.pipeline_id)
        .bind(task.operation.as_str())
        .bind(&task.name)
        .bind(task.status.as_str())
        .bind(&task.error_message)
        .bind(task.created_at)
        .bind(task.updated_at)
        .bind(task.started_at)
        .bind(task.finished_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn find_task(&self, id: Uuid) -> Result<Option<Task>> {
        let row = sqlx::query_as::<_, TaskRow>(
            r#"
            SELECT id, pipeline_id, operation, name, status, error_message,
                   created_at, updated_at, started_at, finished_at
            FROM tasks
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| r.into()))
    }

    async fn list_tasks(&self, pipeline_id: PipelineId) -> Result<Vec<Task>> {
        let rows = sqlx::query_as::<_, TaskRow>(
            r#"
            SELECT id, pipeline_id, operation, name, status, error_message,
                   created_at, updated_at, started_at, finished_at
            FROM tasks
            WHERE pipeline_id = $1
            ORDER BY created_at DESC
            "#,
        )
        .bind(pipeline_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(|r| r.into()).collect())
    }

    async fn list_unfinished(&self) -> Result<Vec<Task>> {
        let rows = sqlx::query_as::<_, TaskRow>(
            r#"
            SELECT id, pipeline_id, operation, name, status, error_message,
                   created_at, updated_at, started_at, finished_at
            FROM tasks
            WHERE status IN ($1, $2)
            ORDER BY created_at ASC
            "#,
        )
        .bind(TaskStatus::Pending.as_str())
        .bind(TaskStatus::Running.as_str())
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(|r| r.into()).collect())
    }

    async fn update_task_status(
        &self,
        id: Uuid,
        status: TaskStatus,
        error_message: Option<String>,
    ) -> Result<bool> {
        let now = Utc::now();

        let result = sqlx::query(
            r#"
            UPDATE tasks
            SET status = $1,
                error_message = COALESCE($2, error_message),
                updated_at = $3,
                started_at = CASE WHEN $4 THEN COALESCE(started_at, $3) ELSE started_at END,
                finished_at = CASE WHEN $5 THEN $3 ELSE finished_at END
            WHERE id = $6
            "#,
        )
        .bind(status.as_str())
        .bind(error_message)
        .bind(now)
        .bind(status == TaskStatus::Running)
        .bind(status.is_terminal())
        .bind(id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn delete_task(&self, id: Uuid) -> Result<bool> {
        let result = sqlx::query("DELETE FROM tasks WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn delete_tasks_for_pipeline(&self, pipeline_id: PipelineId) -> Result<u64> {
        let result = sqlx::query("DELETE FROM tasks WHERE pipeline_id = $1")
            .bind(pipeline_id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }

    async fn insert_step(&self, step: &TaskStep) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO task_steps (id, task_id, machine_id, name, sequence, status,
                                    output, error, created_at, started_at, ended_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            "#,
        )
        .bind(step.id)
        .bind(step.task_id)
        .bind(step.machine_id)
        .bind(&step.name)
        .bind(step.sequence)
        .bind(step.status.as_str())
        .bind(&step.output)
        .bind(&step.error)
        .bind(step.created_at)
        .bind(step.started_at)
        .bind(step.ended_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn find_steps(&self, task_id: Uuid) -> Result<Vec<TaskStep>> {
        let rows = sqlx::query_as::<_, StepRow>(
            r#"
            SELECT id, task_id, machine_id, name, sequence, status, output, error,
                   created_at, started_at, ended_at
            FROM task_steps
            WHERE task_id = $1
            ORDER BY machine_id ASC, sequence ASC
            "#,
        )
        .bind(task_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(|r| r.into()).collect())
    }

    async fn update_step(
        &self,
        id: Uuid,
        status: StepStatus,
        output: Option<String>,
        error: Option<String>,
    ) -> Result<bool> {
        let now = Utc::now();

        let result = sqlx::query(
            r#"
            UPDATE task_steps
            SET status = $1,
                output = COALESCE($2, output),
                error = COALESCE($3, error),
                started_at = CASE WHEN $4 THEN COALESCE(started_at, $5) ELSE started_at END,
                ended_at = CASE WHEN $6 THEN $5 ELSE ended_at END
            WHERE id = $7
            "#,
        )
        .bind(status.as_str())
        .bind(output)
        .bind(error)
        .bind(status == StepStatus::Running)
        .bind(now)
        .bind(status.is_terminal())
        .bind(id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn skip_pending_steps(&self, task_id: Uuid, machine_id: MachineId) -> Result<u64> {
        let result = sqlx::query(
            r#"
            UPDATE task_steps
            SET status = $1, ended_at = $2
            WHERE task_id = $3 AND machine_id = $4 AND status = $5
            "#,
        )
        .bind(StepStatus::Skipped.as_str())
        .bind(Utc::now())
        .bind(task_id)
        .bind(machine_id)
        .bind(StepStatus::Pending.as_str())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    async fn delete_steps(&self, task_id: Uuid) -> Result<u64> {
        let result = sqlx::query("DELETE FROM task_steps WHERE task_id = $1")
            .bind(task_id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }
}

// =============================================================================
// Database Row Types
// =============================================================================

#[derive(sqlx::FromRow)]
struct TaskRow {
    id: Uuid,
    pipeline_id: i64,
    operation: String,
    name: String,
    status: String,
    error_message: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    started_at: Option<DateTime<Utc>>,
    finished_at: Option<DateTime<Utc>>,
}

impl From<TaskRow> for Task {
    fn from(row: TaskRow) -> Self {
        Task {
            id: row.id,
            pipeline_id: row.pipeline_id,
            operation: row.operation.parse().unwrap_or(OperationKind::Initialize),
            name: row.name,
            status: row.status.parse().unwrap_or(TaskStatus::Pending),
            error_message: row.error_message,
            created_at: row.created_at,
            updated_at: row.updated_at,
            started_at: row.started_at,
            finished_at: row.finished_at,
        }
    }
}

#[derive(sqlx::FromRow)]
struct StepRow {
    id: Uuid,
    task_id: Uuid,
    machine_id: i64,
    name: String,
    sequence: i32,
    status: String,
    output: Option<String>,
    error: Option<String>,
    created_at: DateTime<Utc>,
    started_at: Option<DateTime<Utc>>,
    ended_at: Option<DateTime<Utc>>,
}

impl From<StepRow> for TaskStep {
    fn from(row: StepRow) -> Self {
        TaskStep {
            id: row.id,
            task_id: row.task_id,
            machine_id: row.machine_id,
            name: row.name,
            sequence: row.sequence,
            status: row.status.parse().unwrap_or(StepStatus::Pending),
            output: row.output,
            error: row.error,
            created_at: row.created_at,
            started_at: row.started_at,
            ended_at: row.ended_at,
        }
    }
}
