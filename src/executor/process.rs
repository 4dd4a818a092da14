//! Process-control seam: spawn, pipes, cancel-safe wait and forced kill.
//!
//! Production code uses [`TokioProcessHost`]; tests provide their own
//! [`ProcessHost`] that never touches real processes.

use std::future::Future;
use std::io;
use std::path::PathBuf;
use std::process::Stdio;
use tokio::io::AsyncRead;

/// Readable end of a child's stdout or stderr.
pub type OutputPipe = Box<dyn AsyncRead + Send + Unpin>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    pub working_dir: PathBuf,
}

impl CommandSpec {
    /// Splits a resolved command vector into program and arguments.
    pub fn from_command(command: Vec<String>, working_dir: impl Into<PathBuf>) -> Option<Self> {
        let mut parts = command.into_iter();
        let program = parts.next()?;
        Some(Self {
            program,
            args: parts.collect(),
            working_dir: working_dir.into(),
        })
    }
}

pub trait ProcessHandle: Send {
    fn id(&self) -> Option<u32>;

    fn take_stdout(&mut self) -> Option<OutputPipe>;

    fn take_stderr(&mut self) -> Option<OutputPipe>;

    /// Resolves with the exit code once the process has exited; `None` when it
    /// was ended by a signal. Must be cancel-safe: dropping the future and
    /// calling `wait` again is allowed.
    fn wait(&mut self) -> impl Future<Output = io::Result<Option<i32>>> + Send;

    /// Forcibly terminates the process. Calling it again, or after exit, is a no-op.
    fn kill(&mut self) -> impl Future<Output = ()> + Send;
}

pub trait ProcessHost: Send + Sync + 'static {
    type Handle: ProcessHandle + 'static;

    fn spawn(&self, spec: &CommandSpec) -> io::Result<Self::Handle>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct TokioProcessHost;

impl ProcessHost for TokioProcessHost {
    type Handle = TokioProcess;

    fn spawn(&self, spec: &CommandSpec) -> io::Result<TokioProcess> {
        let mut cmd = tokio::process::Command::new(&spec.program);
        cmd.args(&spec.args)
            .current_dir(&spec.working_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let child = cmd.spawn()?;
        Ok(TokioProcess {
            child,
            killed: false,
        })
    }
}

pub struct TokioProcess {
    child: tokio::process::Child,
    killed: bool,
}

impl ProcessHandle for TokioProcess {
    fn id(&self) -> Option<u32> {
        self.child.id()
    }

    fn take_stdout(&mut self) -> Option<OutputPipe> {
        self.child
            .stdout
            .take()
            .map(|pipe| Box::new(pipe) as OutputPipe)
    }

    fn take_stderr(&mut self) -> Option<OutputPipe> {
        self.child
            .stderr
            .take()
            .map(|pipe| Box::new(pipe) as OutputPipe)
    }

    async fn wait(&mut self) -> io::Result<Option<i32>> {
        let status = self.child.wait().await?;
        Ok(status.code())
    }

    async fn kill(&mut self) {
        if self.killed {
            return;
        }
        self.killed = true;
        // Already-exited children report an error here; nothing left to do.
        if let Err(e) = self.child.kill().await {
            tracing::debug!(pid = ?self.child.id(), "Kill after exit ignored: {}", e);
        }
    }
}
