//! Machine State Repository
//!
//! Lifecycle state and process id per (pipeline instance, machine) pair.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use convoy_core::domain::lifecycle::MachineState;
use convoy_core::domain::machine::MachineAssignment;
use convoy_core::{MachineId, PipelineId};
use sqlx::PgPool;

use crate::error::{OrchestratorError, Result};

#[async_trait]
pub trait MachineStateRepository: Send + Sync {
    async fn get(
        &self,
        pipeline_id: PipelineId,
        machine_id: MachineId,
    ) -> Result<Option<MachineAssignment>>;

    /// Creates the pairing in `Initializing`, or returns the existing one
    async fn create(
        &self,
        pipeline_id: PipelineId,
        machine_id: MachineId,
    ) -> Result<MachineAssignment>;

    /// Stores a new state, clearing the process id for states that imply no process
    ///
    /// Edge legality is checked by the caller.
    async fn set_state(
        &self,
        pipeline_id: PipelineId,
        machine_id: MachineId,
        state: MachineState,
    ) -> Result<()>;

    async fn set_pid(
        &self,
        pipeline_id: PipelineId,
        machine_id: MachineId,
        pid: Option<String>,
    ) -> Result<()>;

    async fn list_for_pipeline(&self, pipeline_id: PipelineId) -> Result<Vec<MachineAssignment>>;

    async fn list_all(&self) -> Result<Vec<MachineAssignment>>;

    async fn delete(&self, pipeline_id: PipelineId, machine_id: MachineId) -> Result<bool>;
}

pub(crate) fn assignment_not_found(pipeline_id: PipelineId, machine_id: MachineId) -> OrchestratorError {
    OrchestratorError::not_found(
        "machine assignment",
        format!("{}/{}", pipeline_id, machine_id),
    )
}

/// Postgres implementation of MachineStateRepository
pub struct PgMachineStateRepository {
    pool: PgPool,
}

impl PgMachineStateRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl MachineStateRepository for PgMachineStateRepository {
    async fn get(
        &self,
        pipeline_id: PipelineId,
        machine_id: MachineId,
    ) -> Result<Option<MachineAssignment>> {
        let row = sqlx::query_as::<_, AssignmentRow>(
            r#"
            SELECT pipeline_id, machine_id, state, process_pid, created_at, updated_at
            FROM machine_assignments
            WHERE pipeline_id = $1 AND machine_id = $2
            "#,
        )
        .bind(pipeline_id)
        .bind(machine_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| r.into()))
    }

    async fn create(
        &self,
        pipeline_id: PipelineId,
        machine_id: MachineId,
    ) -> Result<MachineAssignment> {
        let assignment = MachineAssignment::new(pipeline_id, machine_id);

        sqlx::query(
            r#"
            INSERT INTO machine_assignments (pipeline_id, machine_id, state, process_pid,
                                             created_at, updated_at)
            VALUES ($1, $2, $3, NULL, $4, $5)
            ON CONFLICT (pipeline_id, machine_id) DO NOTHING
            "#,
        )
        .bind(pipeline_id)
        .bind(machine_id)
        .bind(assignment.state.as_str())
        .bind(assignment.created_at)
        .bind(assignment.updated_at)
        .execute(&self.pool)
        .await?;

        self.get(pipeline_id, machine_id)
            .await?
            .ok_or_else(|| assignment_not_found(pipeline_id, machine_id))
    }

    async fn set_state(
        &self,
        pipeline_id: PipelineId,
        machine_id: MachineId,
        state: MachineState,
    ) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE machine_assignments
            SET state = $1,
                process_pid = CASE WHEN $2 THEN NULL ELSE process_pid END,
                updated_at = $3
            WHERE pipeline_id = $4 AND machine_id = $5
            "#,
        )
        .bind(state.as_str())
        .bind(state.clears_pid())
        .bind(Utc::now())
        .bind(pipeline_id)
        .bind(machine_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(assignment_not_found(pipeline_id, machine_id));
        }

        Ok(())
    }

    async fn set_pid(
        &self,
        pipeline_id: PipelineId,
        machine_id: MachineId,
        pid: Option<String>,
    ) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE machine_assignments
            SET process_pid = $1, updated_at = $2
            WHERE pipeline_id = $3 AND machine_id = $4
            "#,
        )
        .bind(pid)
        .bind(Utc::now())
        .bind(pipeline_id)
        .bind(machine_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(assignment_not_found(pipeline_id, machine_id));
        }

        Ok(())
    }

    async fn list_for_pipeline(&self, pipeline_id: PipelineId) -> Result<Vec<MachineAssignment>> {
        let rows = sqlx::query_as::<_, AssignmentRow>(
            r#"
            SELECT pipeline_id, machine_id, state, process_pid, created_at, updated_at
            FROM machine_assignments
            WHERE pipeline_id = $1
            ORDER BY machine_id ASC
            "#,
        )
        .bind(pipeline_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(|r| r.into()).collect())
    }

    async fn list_all(&self) -> Result<Vec<MachineAssignment>> {
        let rows = sqlx::query_as::<_, AssignmentRow>(
            r#"
            SELECT pipeline_id, machine_id, state, process_pid, created_at, updated_at
            FROM machine_assignments
            ORDER BY pipeline_id ASC, machine_id ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(|r| r.into()).collect())
    }

    async fn delete(&self, pipeline_id: PipelineId, machine_id: MachineId) -> Result<bool> {
        let result = sqlx::query(
            "DELETE FROM machine_assignments WHERE pipeline_id = $1 AND machine_id = $2",
        )
        .bind(pipeline_id)
        .bind(machine_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }
}

// =============================================================================
// Database Row Types
// =============================================================================

#[derive(sqlx::FromRow)]
struct AssignmentRow {
    pipeline_id: i64,
    machine_id: i64,
    state: String,
    process_pid: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<AssignmentRow> for MachineAssignment {
    fn from(row: AssignmentRow) -> Self {
        MachineAssignment {
            pipeline_id: row.pipeline_id,
            machine_id: row.machine_id,
            // Unknown values are treated as failed deployments so they can be retried
            state: row.state.parse().unwrap_or(MachineState::InitializeFailed),
            process_pid: row.process_pid,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}
