use crate::error::Result;
use crate::models::execution_log::cap_message;
use crate::models::{ExecutionLog, LogKind};
use crate::repository::DbPool;
use chrono::Utc;

#[derive(Clone)]
pub struct LogRepository {
    pool: DbPool,
}

impl LogRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Appends a log line to `execution_id`. The message is capped before storage.
    pub async fn save(&self, execution_id: &str, message: &str, kind: LogKind) -> Result<ExecutionLog> {
        let message = cap_message(message);
        let timestamp = Utc::now();

        let result = sqlx::query(
            r#"
            INSERT INTO execution_logs (execution_id, message, timestamp, kind)
            VALUES (?, ?, ?, ?)
            "#,
        )
        .bind(execution_id)
        .bind(&message)
        .bind(timestamp)
        .bind(kind as i32)
        .execute(&self.pool)
        .await?;

        Ok(ExecutionLog {
            id: result.last_insert_rowid(),
            execution_id: execution_id.to_string(),
            message,
            timestamp,
            kind,
        })
    }

    pub async fn list_by_execution(&self, execution_id: &str) -> Result<Vec<ExecutionLog>> {
        let logs = sqlx::query_as::<_, ExecutionLog>(
            "SELECT * FROM execution_logs WHERE execution_id = ? ORDER BY timestamp ASC, id ASC",
        )
        .bind(execution_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(logs)
    }

    pub async fn list_by_execution_and_kind(
        &self,
        execution_id: &str,
        kind: LogKind,
    ) -> Result<Vec<ExecutionLog>> {
        let logs = sqlx::query_as::<_, ExecutionLog>(
            r#"
            SELECT * FROM execution_logs
            WHERE execution_id = ? AND kind = ?
            ORDER BY timestamp ASC, id ASC
            "#,
        )
        .bind(execution_id)
        .bind(kind as i32)
        .fetch_all(&self.pool)
        .await?;

        Ok(logs)
    }
}
