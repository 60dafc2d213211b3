use async_trait::async_trait;
use sqlx::{PgPool, Row};
use tracing::debug;

use crate::execution::{Execution, ExecutionResult};
use crate::repository::ExecutionRepository;

/// Schema of the executions table.
///
/// The full record lives in `record`; `status` is kept alongside so the
/// forced-terminal guard can be evaluated inside the write itself.
pub const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS narwhal_executions (
    id          TEXT PRIMARY KEY,
    test_name   TEXT NOT NULL,
    status      TEXT NOT NULL,
    record      JSONB NOT NULL,
    created_at  TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    updated_at  TIMESTAMPTZ NOT NULL DEFAULT NOW()
);
CREATE INDEX IF NOT EXISTS narwhal_executions_test_name_idx
    ON narwhal_executions (test_name);
"#;

/// PostgreSQL-backed execution repository.
///
/// Terminal writes are single conditional statements, so a finalization
/// racing an abort or a timeout cannot overwrite the forced status.
#[derive(Debug, Clone)]
pub struct PostgresExecutionRepository {
    pool: PgPool,
}

impl PostgresExecutionRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Get a reference to the connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Create the executions table if it does not exist.
    pub async fn ensure_schema(&self) -> anyhow::Result<()> {
        sqlx::raw_sql(SCHEMA).execute(&self.pool).await?;
        Ok(())
    }

    /// Insert or replace an execution record unconditionally.
    pub async fn insert(&self, execution: &Execution) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            INSERT INTO narwhal_executions (id, test_name, status, record)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (id) DO UPDATE
            SET test_name = EXCLUDED.test_name,
                status = EXCLUDED.status,
                record = EXCLUDED.record,
                updated_at = NOW()
            "#,
        )
        .bind(&execution.id)
        .bind(&execution.test_name)
        .bind(execution.status().as_str())
        .bind(serde_json::to_value(execution)?)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl ExecutionRepository for PostgresExecutionRepository {
    async fn get(&self, id: &str) -> anyhow::Result<Execution> {
        let row = sqlx::query("SELECT record FROM narwhal_executions WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| anyhow::anyhow!("execution {id} not found"))?;

        let record: serde_json::Value = row.try_get("record")?;
        Ok(serde_json::from_value(record)?)
    }

    async fn end_execution(&self, execution: &Execution) -> anyhow::Result<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO narwhal_executions (id, test_name, status, record)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (id) DO UPDATE
            SET status = EXCLUDED.status,
                record = EXCLUDED.record,
                updated_at = NOW()
            WHERE narwhal_executions.status NOT IN ('canceled','timeout','aborted')
            "#,
        )
        .bind(&execution.id)
        .bind(&execution.test_name)
        .bind(execution.status().as_str())
        .bind(serde_json::to_value(execution)?)
        .execute(&self.pool)
        .await?;

        let applied = result.rows_affected() > 0;
        debug!(execution_id = %execution.id, applied, "end execution written");
        Ok(applied)
    }

    async fn update_result(&self, id: &str, result: &ExecutionResult) -> anyhow::Result<bool> {
        let done = sqlx::query(
            r#"
            UPDATE narwhal_executions
            SET status = $2,
                record = jsonb_set(record, '{execution_result}', $3),
                updated_at = NOW()
            WHERE id = $1
              AND status NOT IN ('canceled','timeout','aborted')
            "#,
        )
        .bind(id)
        .bind(result.status.as_str())
        .bind(serde_json::to_value(result)?)
        .execute(&self.pool)
        .await?;

        Ok(done.rows_affected() > 0)
    }
}
