use crate::error::Result;
use crate::models::{Execution, ExecutionLog, LogKind};
use crate::repository::LogRepository;
use crate::services::notification_hub::{ConsoleOutput, NotificationHub};
use crate::services::progress_parser::parse_progress;

/// Persists captured output lines, republishes them and tracks progress markers.
#[derive(Clone)]
pub struct OutputRecorder {
    log_repo: LogRepository,
    hub: NotificationHub,
}

impl OutputRecorder {
    pub fn new(log_repo: LogRepository, hub: NotificationHub) -> Self {
        Self { log_repo, hub }
    }

    /// Records one line of process output. Stdout lines are also scanned for
    /// progress markers; a match overwrites `execution.progress`.
    pub async fn record_output(
        &self,
        execution: &mut Execution,
        kind: LogKind,
        line: &str,
    ) -> Result<ExecutionLog> {
        tracing::trace!(execution_id = %execution.id, kind = kind.as_str(), "{}", line);

        let entry = self.log_repo.save(&execution.id, line, kind).await?;
        self.hub.send_console_output(ConsoleOutput::from(entry.clone()));

        if kind == LogKind::Stdout {
            if let Some(progress) = parse_progress(line) {
                execution.progress = progress;
                self.hub
                    .send_progress_update(&execution.id, progress, execution.status);
            }
        }

        Ok(entry)
    }

    /// Stores a lifecycle annotation. System messages are never republished.
    pub async fn log_system_message(&self, execution_id: &str, message: &str) -> Result<()> {
        tracing::debug!(execution_id, "Logging system message: {}", message);
        self.log_repo
            .save(execution_id, message, LogKind::System)
            .await?;
        Ok(())
    }

    /// Process output of an execution in arrival order, system messages excluded.
    pub async fn console_output(&self, execution_id: &str) -> Result<Vec<ConsoleOutput>> {
        let logs = self.log_repo.list_by_execution(execution_id).await?;
        Ok(logs
            .into_iter()
            .filter(|log| log.kind != LogKind::System)
            .map(ConsoleOutput::from)
            .collect())
    }
}
