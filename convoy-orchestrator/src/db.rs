use sqlx::{PgPool, postgres::PgPoolOptions};
use std::time::Duration;

pub async fn create_pool(database_url: &str) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(10)
        .acquire_timeout(Duration::from_secs(5))
        .connect(database_url)
        .await
}

pub async fn run_migrations(pool: &PgPool) -> Result<(), sqlx::Error> {
    // Create tasks table
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS tasks (
            id UUID PRIMARY KEY,
            pipeline_id BIGINT NOT NULL,
            operation VARCHAR(50) NOT NULL,
            name VARCHAR(255) NOT NULL,
            status VARCHAR(50) NOT NULL,
            error_message TEXT,
            created_at TIMESTAMPTZ NOT NULL,
            updated_at TIMESTAMPTZ NOT NULL,
            started_at TIMESTAMPTZ,
            finished_at TIMESTAMPTZ
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Create task steps table
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS task_steps (
            id UUID PRIMARY KEY,
            task_id UUID NOT NULL REFERENCES tasks(id) ON DELETE CASCADE,
            machine_id BIGINT NOT NULL,
            name VARCHAR(100) NOT NULL,
            sequence INTEGER NOT NULL,
            status VARCHAR(50) NOT NULL,
            output TEXT,
            error TEXT,
            created_at TIMESTAMPTZ NOT NULL,
            started_at TIMESTAMPTZ,
            ended_at TIMESTAMPTZ
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Create machine assignments table
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS machine_assignments (
            pipeline_id BIGINT NOT NULL,
            machine_id BIGINT NOT NULL,
            state VARCHAR(50) NOT NULL,
            process_pid VARCHAR(32),
            created_at TIMESTAMPTZ NOT NULL,
            updated_at TIMESTAMPTZ NOT NULL,
            PRIMARY KEY (pipeline_id, machine_id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Create indexes for ledger queries
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_tasks_pipeline_created ON tasks(pipeline_id, created_at DESC)",
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_tasks_status ON tasks(status)")
        .execute(pool)
        .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_task_steps_task ON task_steps(task_id, machine_id, sequence)",
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_machine_assignments_state ON machine_assignments(state)")
        .execute(pool)
        .await?;

    tracing::info!("Database migrations completed successfully");
    Ok(())
}
