use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Execution not found: {0}")]
    ExecutionNotFound(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            AppError::Database(e) => {
                tracing::error!("Database error: {}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
            }
            AppError::ExecutionNotFound(id) => (
                StatusCode::NOT_FOUND,
                format!("Execution '{}' not found", id),
            ),
            AppError::Validation(e) => (StatusCode::BAD_REQUEST, e),
            AppError::Io(e) => {
                tracing::error!("IO error: {}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
            }
        };

        let body = json!({
            "error": message
        });

        (status, Json(body)).into_response()
    }
}

pub type Result<T> = std::result::Result<T, AppError>;

/// Why a single script run did not complete successfully.
#[derive(Error, Debug)]
pub enum ExecutionError {
    #[error("Script file does not exist: {}", .0.display())]
    ScriptNotFound(PathBuf),

    #[error("Script execution failed with exit code: {0}")]
    NonZeroExit(i32),

    #[error("Script execution timed out after {} seconds", .0.as_secs())]
    Timeout(Duration),

    #[error("Script execution was interrupted")]
    Interrupted,

    #[error("I/O failure: {0}")]
    Io(#[from] std::io::Error),

    #[error("Record store failure: {0}")]
    Store(#[from] AppError),
}

impl ExecutionError {
    /// Exit code to record on the execution, only when the process really exited.
    pub fn exit_code(&self) -> Option<i32> {
        match self {
            ExecutionError::NonZeroExit(code) => Some(*code),
            _ => None,
        }
    }

    /// Human-readable message stored on the failed execution.
    pub fn failure_message(&self) -> String {
        match self {
            ExecutionError::NonZeroExit(_)
            | ExecutionError::Timeout(_)
            | ExecutionError::Interrupted => self.to_string(),
            other => format!("Error executing script: {}", other),
        }
    }
}
