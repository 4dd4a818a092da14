use crate::repository::DbPool;
use anyhow::Result;
use sqlx::sqlite::SqlitePoolOptions;

pub async fn establish_connection(database_url: &str) -> Result<DbPool> {
    // Ensure the database URL has the correct format
    let db_url = if database_url.starts_with("sqlite:") {
        database_url.to_string()
    } else {
        format!("sqlite:{}", database_url)
    };

    let pool = if db_url.contains(":memory:") {
        // Every connection to :memory: is its own database, so pin exactly one.
        SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect(&db_url)
            .await?
    } else {
        // Create connection with create_if_missing option
        let connection_string = format!("{}?mode=rwc", db_url);
        SqlitePoolOptions::new().connect(&connection_string).await?
    };

    // Run migrations
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS executions (
            id TEXT PRIMARY KEY,
            script_path TEXT NOT NULL,
            parameters TEXT,
            status INTEGER NOT NULL,
            exit_code INTEGER,
            progress REAL NOT NULL DEFAULT 0,
            output_file_path TEXT,
            error_message TEXT,
            start_time TEXT,
            end_time TEXT
        );

        CREATE TABLE IF NOT EXISTS execution_logs (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            execution_id TEXT NOT NULL,
            message TEXT NOT NULL,
            timestamp TEXT NOT NULL,
            kind INTEGER NOT NULL,
            FOREIGN KEY (execution_id) REFERENCES executions(id) ON DELETE CASCADE
        );

        CREATE INDEX IF NOT EXISTS idx_executions_status ON executions(status);
        CREATE INDEX IF NOT EXISTS idx_executions_start_time ON executions(start_time);
        CREATE INDEX IF NOT EXISTS idx_execution_logs_execution_id ON execution_logs(execution_id, timestamp);
        "#,
    )
    .execute(&pool)
    .await?;

    Ok(pool)
}
