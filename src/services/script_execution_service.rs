//! Drives one execution from PENDING through RUNNING into a terminal state.
//!
//! The lifecycle task is the only writer of the [`Execution`] while a run is
//! in flight. Stream drains never touch it; they forward lines over a channel
//! and the lifecycle task applies them, including progress updates.

use crate::config::Config;
use crate::error::{AppError, ExecutionError};
use crate::executor::{CommandSpec, ProcessHandle, ProcessHost, StreamDrain, TokioProcessHost, build_command};
use crate::models::{Execution, ExecutionStatus, LogKind};
use crate::repository::ExecutionRepository;
use crate::services::notification_hub::NotificationHub;
use crate::services::output_recorder::OutputRecorder;
use chrono::Utc;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::fs::File;
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// How long drains may keep delivering buffered output after the process exits.
const DEFAULT_FLUSH_GRACE: Duration = Duration::from_secs(5);

/// Minimum spacing between mid-run progress writes to the store.
const PROGRESS_SAVE_INTERVAL: Duration = Duration::from_secs(1);

/// Bound on joining a drain task after it was told to stop.
const DRAIN_JOIN_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug, Clone)]
pub struct RunSettings {
    pub working_dir: PathBuf,
    pub logs_dir: PathBuf,
    pub timeout: Duration,
    pub flush_grace: Duration,
}

impl RunSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            working_dir: config.scripts_dir.clone(),
            logs_dir: config.logs_dir.clone(),
            timeout: config.execution_timeout(),
            flush_grace: DEFAULT_FLUSH_GRACE,
        }
    }
}

#[derive(Debug)]
struct DrainedLine {
    kind: LogKind,
    text: String,
}

fn line_sink(tx: mpsc::UnboundedSender<DrainedLine>, kind: LogKind) -> impl FnMut(String) + Send + 'static {
    move |text| {
        // The receiver is gone once the run has been finalized.
        let _ = tx.send(DrainedLine { kind, text });
    }
}

/// Capture file of a run plus the progress value last written to the store.
struct RunOutput {
    capture: BufWriter<File>,
    saved_progress: f64,
    last_progress_save: Option<Instant>,
}

impl RunOutput {
    fn new(file: File) -> Self {
        Self {
            capture: BufWriter::new(file),
            saved_progress: 0.0,
            last_progress_save: None,
        }
    }

    /// Progress writes are throttled; the final save always carries the latest value.
    fn progress_save_due(&self, progress: f64) -> bool {
        progress != self.saved_progress
            && self
                .last_progress_save
                .is_none_or(|at| at.elapsed() >= PROGRESS_SAVE_INTERVAL)
    }

    fn progress_saved(&mut self, progress: f64) {
        self.saved_progress = progress;
        self.last_progress_save = Some(Instant::now());
    }
}

/// Resources held by one in-flight run, released by [`ActiveRun::cleanup`].
struct ActiveRun<P> {
    process: Option<P>,
    stdout: Option<StreamDrain>,
    stderr: Option<StreamDrain>,
}

impl<P: ProcessHandle> ActiveRun<P> {
    fn new() -> Self {
        Self {
            process: None,
            stdout: None,
            stderr: None,
        }
    }

    fn stop_drains(&self) {
        for drain in self.stdout.iter().chain(self.stderr.iter()) {
            drain.stop();
        }
    }

    async fn join_drains(&mut self, limit: Duration) {
        for drain in [self.stdout.as_mut(), self.stderr.as_mut()].into_iter().flatten() {
            if drain.is_finished() {
                continue;
            }
            if tokio::time::timeout(limit, drain.wait_for()).await.is_err() {
                tracing::warn!("Output drain did not finish within {:?}", limit);
            }
        }
    }

    /// Safety net for every exit path. Both steps are idempotent.
    async fn cleanup(&mut self) {
        if let Some(process) = self.process.as_mut() {
            process.kill().await;
        }
        self.stop_drains();
    }
}

pub struct ScriptExecutionService<H: ProcessHost = TokioProcessHost> {
    exec_repo: ExecutionRepository,
    recorder: OutputRecorder,
    hub: NotificationHub,
    host: Arc<H>,
    settings: RunSettings,
    shutdown: CancellationToken,
}

impl<H: ProcessHost> Clone for ScriptExecutionService<H> {
    fn clone(&self) -> Self {
        Self {
            exec_repo: self.exec_repo.clone(),
            recorder: self.recorder.clone(),
            hub: self.hub.clone(),
            host: self.host.clone(),
            settings: self.settings.clone(),
            shutdown: self.shutdown.clone(),
        }
    }
}

impl<H: ProcessHost> ScriptExecutionService<H> {
    pub fn new(
        exec_repo: ExecutionRepository,
        recorder: OutputRecorder,
        hub: NotificationHub,
        host: H,
        settings: RunSettings,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            exec_repo,
            recorder,
            hub,
            host: Arc::new(host),
            settings,
            shutdown,
        }
    }

    /// Runs `execution` to completion and returns the captured output on success.
    ///
    /// The final state is always persisted and announced with exactly one
    /// terminal status event, whichever way the run ends.
    pub async fn execute_script(&self, mut execution: Execution) -> Result<String, ExecutionError> {
        tracing::info!(
            execution_id = %execution.id,
            script = %execution.script_path,
            parameters = ?execution.parameters,
            "Executing script"
        );

        self.mark_running(&mut execution).await?;

        let mut run = ActiveRun::new();
        let outcome = self.monitor(&mut execution, &mut run).await;
        run.cleanup().await;

        match outcome {
            Ok(result) => {
                self.finish_success(&mut execution).await;
                Ok(result)
            }
            Err(err) => {
                self.finish_failure(&mut execution, &err).await;
                Err(err)
            }
        }
    }

    async fn mark_running(&self, execution: &mut Execution) -> Result<(), ExecutionError> {
        if !execution.transition_to(ExecutionStatus::Running) {
            return Err(AppError::Validation(format!(
                "Execution '{}' is {} and cannot be started",
                execution.id, execution.status
            ))
            .into());
        }
        execution.start_time = Some(Utc::now());
        execution.progress = 0.0;
        self.exec_repo.save(execution).await?;

        self.hub.send_status_update(&execution.id, execution.status);
        self.log_system(&execution.id, "Script execution started").await;
        Ok(())
    }

    async fn monitor(
        &self,
        execution: &mut Execution,
        run: &mut ActiveRun<H::Handle>,
    ) -> Result<String, ExecutionError> {
        if self.shutdown.is_cancelled() {
            return Err(ExecutionError::Interrupted);
        }

        let script_path = PathBuf::from(&execution.script_path);
        let command = build_command(&script_path, execution.parameters.as_deref())?;

        let capture_path = self.create_capture_file(&execution.id).await?;
        execution.output_file_path = Some(capture_path.to_string_lossy().to_string());
        self.exec_repo.save(execution).await?;
        let mut output = RunOutput::new(
            tokio::fs::OpenOptions::new()
                .append(true)
                .open(&capture_path)
                .await?,
        );

        let spec = CommandSpec::from_command(command, &self.settings.working_dir)
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "empty command"))?;
        tracing::debug!(
            execution_id = %execution.id,
            program = %spec.program,
            args = ?spec.args,
            "Spawning process"
        );

        let process = run.process.insert(self.host.spawn(&spec)?);
        tracing::info!(execution_id = %execution.id, pid = ?process.id(), "Process started");

        let (tx, mut rx) = mpsc::unbounded_channel();
        if let Some(stdout) = process.take_stdout() {
            run.stdout = Some(StreamDrain::start("stdout", stdout, line_sink(tx.clone(), LogKind::Stdout)));
        }
        if let Some(stderr) = process.take_stderr() {
            run.stderr = Some(StreamDrain::start("stderr", stderr, line_sink(tx.clone(), LogKind::Stderr)));
        }
        drop(tx);

        let deadline = tokio::time::sleep(self.settings.timeout);
        tokio::pin!(deadline);
        let mut lines_open = true;

        let exit = loop {
            tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => {
                    tracing::warn!(execution_id = %execution.id, "Shutdown requested, killing process");
                    process.kill().await;
                    return Err(ExecutionError::Interrupted);
                }
                status = process.wait() => break status?,
                _ = &mut deadline => {
                    tracing::warn!(
                        execution_id = %execution.id,
                        timeout_secs = self.settings.timeout.as_secs(),
                        "Script execution timed out, killing process"
                    );
                    process.kill().await;
                    return Err(ExecutionError::Timeout(self.settings.timeout));
                }
                line = rx.recv(), if lines_open => match line {
                    Some(line) => self.handle_line(execution, &mut output, line).await?,
                    None => lines_open = false,
                },
            }
        };

        // Signal-terminated processes have no code of their own.
        let exit_code = exit.unwrap_or(-1);
        tracing::info!(execution_id = %execution.id, exit_code, "Process exited");

        let flush = async {
            while let Some(line) = rx.recv().await {
                self.handle_line(execution, &mut output, line).await?;
            }
            Ok::<_, ExecutionError>(())
        };
        match tokio::time::timeout(self.settings.flush_grace, flush).await {
            Ok(flushed) => flushed?,
            Err(_) => tracing::warn!(
                execution_id = %execution.id,
                "Output streams still open after process exit, finalizing anyway"
            ),
        }

        run.stop_drains();
        run.join_drains(DRAIN_JOIN_TIMEOUT).await;
        while let Ok(line) = rx.try_recv() {
            self.handle_line(execution, &mut output, line).await?;
        }

        execution.exit_code = Some(exit_code);
        output.capture.flush().await?;
        drop(output);

        if exit_code != 0 {
            return Err(ExecutionError::NonZeroExit(exit_code));
        }

        Ok(tokio::fs::read_to_string(&capture_path).await?)
    }

    async fn handle_line(
        &self,
        execution: &mut Execution,
        output: &mut RunOutput,
        line: DrainedLine,
    ) -> Result<(), ExecutionError> {
        output.capture.write_all(line.text.as_bytes()).await?;
        output.capture.write_all(b"\n").await?;

        if let Err(e) = self.recorder.record_output(execution, line.kind, &line.text).await {
            tracing::error!(execution_id = %execution.id, "Failed to record output line: {}", e);
        }

        if output.progress_save_due(execution.progress) {
            match self.exec_repo.save(execution).await {
                Ok(()) => output.progress_saved(execution.progress),
                Err(e) => tracing::warn!(execution_id = %execution.id, "Failed to persist progress: {}", e),
            }
        }
        Ok(())
    }

    async fn create_capture_file(&self, execution_id: &str) -> io::Result<PathBuf> {
        tokio::fs::create_dir_all(&self.settings.logs_dir).await?;

        let file_name = capture_file_name(execution_id);
        let path = self.settings.logs_dir.join(file_name);
        tracing::debug!(path = %path.display(), "Creating output capture file");
        tokio::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .await?;
        Ok(path)
    }

    async fn finish_success(&self, execution: &mut Execution) {
        execution.transition_to(ExecutionStatus::Completed);
        execution.end_time = Some(Utc::now());
        execution.progress = 100.0;
        self.persist_final(execution).await;

        tracing::info!(execution_id = %execution.id, "Script execution completed successfully");
        self.log_system(&execution.id, "Script execution completed successfully")
            .await;
        self.hub.send_status_update(&execution.id, execution.status);
        self.hub
            .send_progress_update(&execution.id, 100.0, execution.status);
    }

    async fn finish_failure(&self, execution: &mut Execution, err: &ExecutionError) {
        let status = match err {
            ExecutionError::Timeout(_) => ExecutionStatus::TimedOut,
            _ => ExecutionStatus::Failed,
        };
        let message = err.failure_message();

        execution.transition_to(status);
        execution.end_time = Some(Utc::now());
        execution.error_message = Some(message.clone());
        if let Some(code) = err.exit_code() {
            execution.exit_code = Some(code);
        }
        self.persist_final(execution).await;

        tracing::error!(execution_id = %execution.id, status = status.as_str(), "{}", message);
        let summary = match status {
            ExecutionStatus::TimedOut => format!("Script execution timed out: {}", message),
            _ => format!("Script execution failed: {}", message),
        };
        self.log_system(&execution.id, &summary).await;
        self.hub.send_status_update(&execution.id, execution.status);
    }

    async fn persist_final(&self, execution: &Execution) {
        if let Err(e) = self.exec_repo.save(execution).await {
            tracing::error!(execution_id = %execution.id, "Failed to persist final state: {}", e);
        }
    }

    async fn log_system(&self, execution_id: &str, message: &str) {
        if let Err(e) = self.recorder.log_system_message(execution_id, message).await {
            tracing::error!(execution_id, "Failed to store system message: {}", e);
        }
    }
}

fn capture_file_name(execution_id: &str) -> String {
    format!(
        "execution_{}_{}.log",
        execution_id,
        chrono::Local::now().format("%Y%m%d_%H%M%S")
    )
}

/// Resolves `script_name` the way a triggered run does: blank names fall back
/// to `default_script`, absolute names are kept, relative ones land under `base_dir`.
pub fn resolve_script_path(base_dir: &Path, default_script: &str, script_name: Option<&str>) -> PathBuf {
    let name = match script_name.map(str::trim) {
        Some(name) if !name.is_empty() => name,
        _ => default_script,
    };

    let path = Path::new(name);
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base_dir.join(path)
    }
}
