use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Execution {
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

impl Execution {
    pub fn new(script_path: impl Into<String>, parameters: Option<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            script_path: script_path.into(),
            parameters,
            status: ExecutionStatus::Pending,
            exit_code: None,
            progress: 0.0,
            output_file_path: None,
            error_message: None,
            start_time: None,
            end_time: None,
        }
    }

    /// Moves the execution to `next`, refusing anything that is not a forward step.
    pub fn transition_to(&mut self, next: ExecutionStatus) -> bool {
        if !self.status.can_transition_to(next) {
            tracing::warn!(
                execution_id = %self.id,
                from = self.status.as_str(),
                to = next.as_str(),
                "Rejected execution status transition"
            );
            return false;
        }
        self.status = next;
        true
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, sqlx::Type, PartialEq, Eq)]
#[repr(i32)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExecutionStatus {
    Pending = 0,
    Running = 1,
    Completed = 2,
    Failed = 3,
    TimedOut = 4,
}

impl ExecutionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Running => "RUNNING",
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
            Self::TimedOut => "TIMED_OUT",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::TimedOut)
    }

    pub fn can_transition_to(&self, next: ExecutionStatus) -> bool {
        match (self, next) {
            (Self::Pending, Self::Running) => true,
            (Self::Running, next) => next.is_terminal(),
            _ => false,
        }
    }
}

impl std::fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
