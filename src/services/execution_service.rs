use crate::config::Config;
use crate::error::{AppError, ExecutionError, Result};
use crate::executor::{ProcessHost, TokioProcessHost};
use crate::models::{Execution, ExecutionLog, ExecutionStatus, LogKind};
use crate::repository::{ExecutionRepository, LogRepository};
use crate::services::notification_hub::ConsoleOutput;
use crate::services::output_recorder::OutputRecorder;
use crate::services::script_execution_service::{ScriptExecutionService, resolve_script_path};
use chrono::Utc;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

/// Accepts run requests and hands them to a bounded pool of lifecycle tasks.
///
/// At most `max_concurrent` scripts run at once; further requests stay
/// PENDING and start in arrival order as slots free up.
pub struct ExecutionService<H: ProcessHost = TokioProcessHost> {
    exec_repo: ExecutionRepository,
    log_repo: LogRepository,
    recorder: OutputRecorder,
    runner: ScriptExecutionService<H>,
    workers: Arc<Semaphore>,
    tasks: TaskTracker,
    shutdown: CancellationToken,
    scripts_dir: PathBuf,
    default_script: String,
}

impl<H: ProcessHost> Clone for ExecutionService<H> {
    fn clone(&self) -> Self {
        Self {
            exec_repo: self.exec_repo.clone(),
            log_repo: self.log_repo.clone(),
            recorder: self.recorder.clone(),
            runner: self.runner.clone(),
            workers: self.workers.clone(),
            tasks: self.tasks.clone(),
            shutdown: self.shutdown.clone(),
            scripts_dir: self.scripts_dir.clone(),
            default_script: self.default_script.clone(),
        }
    }
}

impl<H: ProcessHost> ExecutionService<H> {
    pub fn new(
        config: &Config,
        exec_repo: ExecutionRepository,
        log_repo: LogRepository,
        recorder: OutputRecorder,
        runner: ScriptExecutionService<H>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            exec_repo,
            log_repo,
            recorder,
            runner,
            workers: Arc::new(Semaphore::new(config.max_concurrent)),
            tasks: TaskTracker::new(),
            shutdown,
            scripts_dir: config.scripts_dir.clone(),
            default_script: config.default_script.clone(),
        }
    }

    /// Creates a PENDING record and schedules it. Returns without waiting for the run.
    pub async fn start_execution(
        &self,
        script_name: Option<&str>,
        parameters: Option<String>,
    ) -> Result<Execution> {
        if self.shutdown.is_cancelled() {
            return Err(AppError::Validation(
                "Service is shutting down, no new executions accepted".to_string(),
            ));
        }

        let script_path = resolve_script_path(&self.scripts_dir, &self.default_script, script_name);
        let parameters = parameters.filter(|p| !p.trim().is_empty());

        let execution = self
            .exec_repo
            .create(&script_path.to_string_lossy(), parameters)
            .await?;
        tracing::info!(
            execution_id = %execution.id,
            script = %execution.script_path,
            "Execution queued"
        );

        self.schedule(execution.clone());
        Ok(execution)
    }

    /// Reconciles rows left behind by a previous process: RUNNING rows lost
    /// their process and become FAILED, PENDING rows are queued again.
    pub async fn recover(&self) -> Result<()> {
        for mut execution in self.exec_repo.list_by_status(ExecutionStatus::Running).await? {
            tracing::warn!(execution_id = %execution.id, "Marking orphaned execution as interrupted");
            let message = ExecutionError::Interrupted.failure_message();
            execution.transition_to(ExecutionStatus::Failed);
            execution.end_time = Some(Utc::now());
            execution.error_message = Some(message.clone());
            self.exec_repo.save(&execution).await?;
            self.recorder
                .log_system_message(&execution.id, &format!("Script execution failed: {}", message))
                .await?;
        }

        for execution in self.exec_repo.list_by_status(ExecutionStatus::Pending).await? {
            tracing::info!(execution_id = %execution.id, "Re-queueing pending execution");
            self.schedule(execution);
        }
        Ok(())
    }

    fn schedule(&self, execution: Execution) {
        let workers = self.workers.clone();
        let runner = self.runner.clone();
        self.tasks.spawn(async move {
            let _permit = match workers.acquire_owned().await {
                Ok(permit) => permit,
                Err(e) => {
                    tracing::error!(execution_id = %execution.id, "Worker pool closed: {}", e);
                    return;
                }
            };

            let execution_id = execution.id.clone();
            match runner.execute_script(execution).await {
                Ok(_) => tracing::debug!(%execution_id, "Execution task finished"),
                Err(e) => tracing::debug!(%execution_id, "Execution task finished with error: {}", e),
            }
        });
    }

    pub async fn get_execution(&self, id: &str) -> Result<Execution> {
        self.exec_repo.get(id).await
    }

    pub async fn list_executions(&self) -> Result<Vec<Execution>> {
        self.exec_repo.list_all().await
    }

    pub async fn console_output(&self, id: &str) -> Result<Vec<ConsoleOutput>> {
        self.exec_repo.get(id).await?;
        self.recorder.console_output(id).await
    }

    pub async fn logs(&self, id: &str, kind: Option<LogKind>) -> Result<Vec<ExecutionLog>> {
        self.exec_repo.get(id).await?;
        match kind {
            Some(kind) => self.log_repo.list_by_execution_and_kind(id, kind).await,
            None => self.log_repo.list_by_execution(id).await,
        }
    }

    /// Interrupts in-flight runs and waits for them to record their final state.
    pub async fn shutdown(&self) {
        tracing::info!(in_flight = self.tasks.len(), "Stopping execution service");
        self.shutdown.cancel();
        self.tasks.close();
        self.tasks.wait().await;
    }
}

#[cfg(test)]
impl<H: ProcessHost> ExecutionService<H> {
    /// Waits until every scheduled run has reached a terminal state.
    pub async fn wait_idle(&self) {
        self.tasks.close();
        self.tasks.wait().await;
        self.tasks.reopen();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::establish_connection;
    use crate::services::notification_hub::NotificationHub;
    use crate::services::script_execution_service::RunSettings;
    use crate::executor::CommandSpec;
    use crate::executor::ProcessHandle;
    use crate::executor::process::OutputPipe;
    use std::io;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::time::Instant;

    async fn service(dir: &tempfile::TempDir, max_concurrent: usize) -> ExecutionService {
        service_with(dir, max_concurrent, TokioProcessHost).await
    }

    async fn service_with<H: ProcessHost>(
        dir: &tempfile::TempDir,
        max_concurrent: usize,
        host: H,
    ) -> ExecutionService<H> {
        let pool = establish_connection("sqlite::memory:").await.unwrap();
        let config = Config {
            database_url: "sqlite::memory:".to_string(),
            host: "127.0.0.1".to_string(),
            port: 0,
            scripts_dir: dir.path().to_path_buf(),
            default_script: "sample.sh".to_string(),
            execution_timeout_secs: 30,
            logs_dir: dir.path().join("logs"),
            max_concurrent,
        };
        let exec_repo = ExecutionRepository::new(pool.clone());
        let log_repo = LogRepository::new(pool);
        let hub = NotificationHub::default();
        let recorder = OutputRecorder::new(log_repo.clone(), hub.clone());
        let shutdown = CancellationToken::new();
        let runner = ScriptExecutionService::new(
            exec_repo.clone(),
            recorder.clone(),
            hub,
            host,
            RunSettings::from_config(&config),
            shutdown.clone(),
        );
        ExecutionService::new(&config, exec_repo, log_repo, recorder, runner, shutdown)
    }

    #[tokio::test]
    async fn blank_name_falls_back_to_default_script() {
        let dir = tempfile::tempdir().unwrap();
        let service = service(&dir, 1).await;

        let execution = service.start_execution(Some(""), None).await.unwrap();
        assert_eq!(execution.status, ExecutionStatus::Pending);
        assert_eq!(
            PathBuf::from(&execution.script_path),
            dir.path().join("sample.sh")
        );

        service.wait_idle().await;
        // sample.sh was never written.
        let finished = service.get_execution(&execution.id).await.unwrap();
        assert_eq!(finished.status, ExecutionStatus::Failed);
        assert!(finished.error_message.unwrap().contains("does not exist"));
    }

    #[tokio::test]
    async fn unknown_execution_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let service = service(&dir, 1).await;

        assert!(matches!(
            service.get_execution("nope").await,
            Err(AppError::ExecutionNotFound(_))
        ));
        assert!(matches!(
            service.logs("nope", None).await,
            Err(AppError::ExecutionNotFound(_))
        ));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn runs_beyond_pool_size_queue_and_all_finish() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("job.sh"),
            "echo \"run $1\"\nsleep 0.2\necho 'Progress: 100%'\n",
        )
        .unwrap();
        let service = service(&dir, 2).await;

        let mut ids = Vec::new();
        for i in 0..5 {
            let execution = service
                .start_execution(Some("job.sh"), Some(i.to_string()))
                .await
                .unwrap();
            ids.push(execution.id);
        }

        tokio::time::timeout(Duration::from_secs(30), service.wait_idle())
            .await
            .expect("all runs should finish");

        for (i, id) in ids.iter().enumerate() {
            let execution = service.get_execution(id).await.unwrap();
            assert_eq!(execution.status, ExecutionStatus::Completed, "run {}", i);
            let console = service.console_output(id).await.unwrap();
            assert_eq!(console[0].message, format!("run {}", i));
        }
        assert_eq!(service.list_executions().await.unwrap().len(), 5);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn logs_can_be_filtered_by_kind() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("job.sh"), "echo out\necho err >&2\n").unwrap();
        let service = service(&dir, 1).await;

        let execution = service.start_execution(Some("job.sh"), None).await.unwrap();
        service.wait_idle().await;

        let stderr = service
            .logs(&execution.id, Some(LogKind::Stderr))
            .await
            .unwrap();
        assert_eq!(stderr.len(), 1);
        assert_eq!(stderr[0].message, "err");

        let system = service
            .logs(&execution.id, Some(LogKind::System))
            .await
            .unwrap();
        assert_eq!(system.len(), 2);

        let all = service.logs(&execution.id, None).await.unwrap();
        assert_eq!(all.len(), 4);
    }

    #[tokio::test]
    async fn recover_fails_orphaned_runs_and_requeues_pending() {
        let dir = tempfile::tempdir().unwrap();
        let service = service(&dir, 1).await;

        let mut orphan = service
            .exec_repo
            .create("/scripts/gone.sh", None)
            .await
            .unwrap();
        orphan.transition_to(ExecutionStatus::Running);
        service.exec_repo.save(&orphan).await.unwrap();
        let queued = service
            .exec_repo
            .create(&dir.path().join("missing.sh").to_string_lossy(), None)
            .await
            .unwrap();

        service.recover().await.unwrap();
        service.wait_idle().await;

        let orphan = service.get_execution(&orphan.id).await.unwrap();
        assert_eq!(orphan.status, ExecutionStatus::Failed);
        assert_eq!(
            orphan.error_message.as_deref(),
            Some("Script execution was interrupted")
        );

        // The re-queued run went through the normal lifecycle.
        let queued = service.get_execution(&queued.id).await.unwrap();
        assert_eq!(queued.status, ExecutionStatus::Failed);
        assert!(queued.start_time.is_some());
    }

    /// Counts processes alive at the same time. Each one exits after `hold`.
    #[derive(Clone)]
    struct CountingHost {
        hold: Duration,
        live: Arc<AtomicUsize>,
        peak: Arc<AtomicUsize>,
    }

    struct CountingProcess {
        exit_at: Instant,
        exited: bool,
        live: Arc<AtomicUsize>,
    }

    impl CountingProcess {
        fn mark_exited(&mut self) {
            if !self.exited {
                self.exited = true;
                self.live.fetch_sub(1, Ordering::SeqCst);
            }
        }
    }

    impl ProcessHandle for CountingProcess {
        fn id(&self) -> Option<u32> {
            None
        }

        fn take_stdout(&mut self) -> Option<OutputPipe> {
            None
        }

        fn take_stderr(&mut self) -> Option<OutputPipe> {
            None
        }

        async fn wait(&mut self) -> io::Result<Option<i32>> {
            tokio::time::sleep_until(self.exit_at).await;
            self.mark_exited();
            Ok(Some(0))
        }

        async fn kill(&mut self) {
            self.mark_exited();
        }
    }

    impl ProcessHost for CountingHost {
        type Handle = CountingProcess;

        fn spawn(&self, _spec: &CommandSpec) -> io::Result<CountingProcess> {
            let now_live = self.live.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now_live, Ordering::SeqCst);
            Ok(CountingProcess {
                exit_at: Instant::now() + self.hold,
                exited: false,
                live: self.live.clone(),
            })
        }
    }

    #[tokio::test]
    async fn pool_never_exceeds_max_concurrent() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("job.sh"), "echo hi\n").unwrap();
        let host = CountingHost {
            hold: Duration::from_millis(500),
            live: Arc::new(AtomicUsize::new(0)),
            peak: Arc::new(AtomicUsize::new(0)),
        };
        let peak = host.peak.clone();
        let service = service_with(&dir, 2, host).await;

        for _ in 0..5 {
            service.start_execution(Some("job.sh"), None).await.unwrap();
        }

        let count = |executions: &[Execution], status: ExecutionStatus| {
            executions.iter().filter(|e| e.status == status).count()
        };
        let mut snapshot = Vec::new();
        for _ in 0..100 {
            snapshot = service.list_executions().await.unwrap();
            if count(&snapshot, ExecutionStatus::Running) == 2 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(count(&snapshot, ExecutionStatus::Running), 2);
        // The rest wait for a free slot.
        assert_eq!(count(&snapshot, ExecutionStatus::Pending), 3);

        tokio::time::timeout(Duration::from_secs(30), service.wait_idle())
            .await
            .expect("all runs should finish");

        assert_eq!(peak.load(Ordering::SeqCst), 2);
        let finished = service.list_executions().await.unwrap();
        assert_eq!(count(&finished, ExecutionStatus::Completed), 5);
    }

    #[tokio::test]
    async fn shutdown_rejects_new_runs() {
        let dir = tempfile::tempdir().unwrap();
        let service = service(&dir, 1).await;

        service.shutdown().await;
        assert!(matches!(
            service.start_execution(Some("job.sh"), None).await,
            Err(AppError::Validation(_))
        ));
    }
}
