use crate::error::{AppError, Result};
use crate::models::{Execution, ExecutionStatus};
use crate::repository::DbPool;

const TERMINAL_STATUSES: [ExecutionStatus; 3] = [
    ExecutionStatus::Completed,
    ExecutionStatus::Failed,
    ExecutionStatus::TimedOut,
];

#[derive(Clone)]
pub struct ExecutionRepository {
    pool: DbPool,
}

impl ExecutionRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub async fn create(&self, script_path: &str, parameters: Option<String>) -> Result<Execution> {
        let execution = Execution::new(script_path, parameters);

        sqlx::query(
            r#"
            INSERT INTO executions (id, script_path, parameters, status, progress)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(&execution.id)
        .bind(&execution.script_path)
        .bind(&execution.parameters)
        .bind(execution.status as i32)
        .bind(execution.progress)
        .execute(&self.pool)
        .await?;

        Ok(execution)
    }

    pub async fn get(&self, id: &str) -> Result<Execution> {
        let execution = sqlx::query_as::<_, Execution>("SELECT * FROM executions WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| AppError::ExecutionNotFound(id.to_string()))?;

        Ok(execution)
    }

    pub async fn list_all(&self) -> Result<Vec<Execution>> {
        // Never-started executions sort last.
        let executions = sqlx::query_as::<_, Execution>(
            "SELECT * FROM executions ORDER BY start_time IS NULL, start_time DESC",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(executions)
    }

    pub async fn list_by_status(&self, status: ExecutionStatus) -> Result<Vec<Execution>> {
        let executions = sqlx::query_as::<_, Execution>(
            "SELECT * FROM executions WHERE status = ? ORDER BY start_time DESC, rowid ASC",
        )
        .bind(status as i32)
        .fetch_all(&self.pool)
        .await?;

        Ok(executions)
    }

    /// Persists the full in-memory state of `execution`.
    ///
    /// A row that already reached a terminal status is read-only; saving over
    /// it fails with [`AppError::Validation`].
    pub async fn save(&self, execution: &Execution) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE executions
            SET status = ?, exit_code = ?, progress = ?, output_file_path = ?,
                error_message = ?, start_time = ?, end_time = ?
            WHERE id = ? AND status NOT IN (?, ?, ?)
            "#,
        )
        .bind(execution.status as i32)
        .bind(execution.exit_code)
        .bind(execution.progress)
        .bind(&execution.output_file_path)
        .bind(&execution.error_message)
        .bind(execution.start_time)
        .bind(execution.end_time)
        .bind(&execution.id)
        .bind(TERMINAL_STATUSES[0] as i32)
        .bind(TERMINAL_STATUSES[1] as i32)
        .bind(TERMINAL_STATUSES[2] as i32)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            let stored = self.get(&execution.id).await?;
            return Err(AppError::Validation(format!(
                "Execution '{}' is already {} and cannot be modified",
                execution.id, stored.status
            )));
        }

        Ok(())
    }
}
