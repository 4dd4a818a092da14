use crate::models::{Execution, ExecutionLog, ExecutionStatus, LogKind};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartExecutionRequest {
    pub script_name: Option<String>,
    pub parameters: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct LogsQuery {
    pub kind: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionResponse {
    pub id: String,
    pub script_path: String,
    pub parameters: Option<String>,
    pub status: ExecutionStatus,
    pub exit_code: Option<i32>,
    pub progress: f64,
    pub output_file_path: Option<String>,
    pub error_message: Option<String>,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
}

impl From<Execution> for ExecutionResponse {
    fn from(execution: Execution) -> Self {
        Self {
            id: execution.id,
            script_path: execution.script_path,
            parameters: execution.parameters,
            status: execution.status,
            exit_code: execution.exit_code,
            progress: execution.progress,
            output_file_path: execution.output_file_path,
            error_message: execution.error_message,
            start_time: execution.start_time,
            end_time: execution.end_time,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ExecutionsListResponse {
    pub data: Vec<ExecutionResponse>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LogEntryResponse {
    pub id: i64,
    pub execution_id: String,
    pub message: String,
    pub timestamp: DateTime<Utc>,
    #[serde(rename = "type")]
    pub kind: LogKind,
}

impl From<ExecutionLog> for LogEntryResponse {
    fn from(log: ExecutionLog) -> Self {
        Self {
            id: log.id,
            execution_id: log.execution_id,
            message: log.message,
            timestamp: log.timestamp,
            kind: log.kind,
        }
    }
}
