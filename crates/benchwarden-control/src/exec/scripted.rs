//! In-memory command runner for tests.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use super::{CommandOutput, CommandRunner, CommandSpec, ProcessHandle};
use crate::error::{ExecError, ExitReport};

/// How a scripted command responds.
#[derive(Debug, Clone)]
pub enum ScriptedResponse {
    /// Exit zero with the given stdout.
    Success(String),
    /// Exit with a non-zero code and the given stderr.
    Failure {
        /// Exit code.
        code: i32,
        /// Standard error.
        stderr: String,
    },
    /// Never finish within the time limit.
    Timeout,
}

impl ScriptedResponse {
    /// Successful run with empty output.
    #[must_use]
    pub const fn ok() -> Self {
        Self::Success(String::new())
    }

    /// Successful run printing `stdout`.
    #[must_use]
    pub fn stdout(stdout: impl Into<String>) -> Self {
        Self::Success(stdout.into())
    }

    /// Failed run with exit code 1.
    #[must_use]
    pub fn fail(stderr: impl Into<String>) -> Self {
        Self::Failure {
            code: 1,
            stderr: stderr.into(),
        }
    }
}

type Handler = dyn Fn(&CommandSpec) -> ScriptedResponse + Send + Sync;

/// A [`CommandRunner`] that answers through a handler and records every call.
///
/// Spawned processes are [`ScriptedProcess`] values whose termination is
/// recorded rather than signalled.
pub struct ScriptedRunner {
    handler: Box<Handler>,
    calls: Mutex<Vec<CommandSpec>>,
    terminated: Arc<Mutex<Vec<u32>>>,
    next_pid: AtomicU32,
}

impl std::fmt::Debug for ScriptedRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScriptedRunner")
            .field("calls", &self.command_lines().len())
            .finish_non_exhaustive()
    }
}

impl ScriptedRunner {
    /// Create a runner answering every command with `handler`.
    pub fn new<F>(handler: F) -> Self
    where
        F: Fn(&CommandSpec) -> ScriptedResponse + Send + Sync + 'static,
    {
        Self {
            handler: Box::new(handler),
            calls: Mutex::new(Vec::new()),
            terminated: Arc::new(Mutex::new(Vec::new())),
            next_pid: AtomicU32::new(1000),
        }
    }

    /// Create a runner where every command succeeds with empty output.
    #[must_use]
    pub fn succeeding() -> Self {
        Self::new(|_| ScriptedResponse::ok())
    }

    /// Every command received, in order.
    #[must_use]
    pub fn calls(&self) -> Vec<CommandSpec> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    /// Masked command lines received, in order.
    #[must_use]
    pub fn command_lines(&self) -> Vec<String> {
        self.calls().iter().map(CommandSpec::display).collect()
    }

    /// Command lines received that start with `prefix`.
    #[must_use]
    pub fn lines_starting_with(&self, prefix: &str) -> Vec<String> {
        self.command_lines()
            .into_iter()
            .filter(|l| l.starts_with(prefix))
            .collect()
    }

    /// Pids of spawned processes that have been terminated.
    #[must_use]
    pub fn terminated(&self) -> Vec<u32> {
        self.terminated.lock().map(|t| t.clone()).unwrap_or_default()
    }

    fn record(&self, spec: &CommandSpec) -> ScriptedResponse {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(spec.clone());
        }
        (self.handler)(spec)
    }
}

#[async_trait]
impl CommandRunner for ScriptedRunner {
    async fn run(&self, spec: &CommandSpec) -> Result<CommandOutput, ExecError> {
        match self.record(spec) {
            ScriptedResponse::Success(stdout) => Ok(CommandOutput {
                status: ExitReport { code: Some(0) },
                stdout,
                stderr: String::new(),
            }),
            ScriptedResponse::Failure { code, stderr } => Err(ExecError::Failed {
                command: spec.display(),
                status: ExitReport { code: Some(code) },
                stderr,
            }),
            ScriptedResponse::Timeout => Err(ExecError::Timeout {
                command: spec.display(),
                timeout_secs: spec.timeout_limit().map_or(0, |d| d.as_secs()),
            }),
        }
    }

    async fn spawn(&self, spec: &CommandSpec) -> Result<Box<dyn ProcessHandle>, ExecError> {
        match self.record(spec) {
            ScriptedResponse::Success(_) => Ok(Box::new(ScriptedProcess {
                pid: self.next_pid.fetch_add(1, Ordering::Relaxed),
                command: spec.display(),
                terminated: Arc::clone(&self.terminated),
                exited: false,
            })),
            ScriptedResponse::Failure { stderr, .. } => Err(ExecError::Spawn {
                command: spec.display(),
                source: std::io::Error::other(stderr),
            }),
            ScriptedResponse::Timeout => Err(ExecError::Timeout {
                command: spec.display(),
                timeout_secs: 0,
            }),
        }
    }
}

/// A process handed out by [`ScriptedRunner::spawn`].
#[derive(Debug)]
pub struct ScriptedProcess {
    pid: u32,
    command: String,
    terminated: Arc<Mutex<Vec<u32>>>,
    exited: bool,
}

#[async_trait]
impl ProcessHandle for ScriptedProcess {
    fn id(&self) -> Option<u32> {
        (!self.exited).then_some(self.pid)
    }

    fn command(&self) -> &str {
        &self.command
    }

    async fn terminate(&mut self, _grace: Duration) -> Result<(), ExecError> {
        if !self.exited {
            if let Ok(mut terminated) = self.terminated.lock() {
                terminated.push(self.pid);
            }
            self.exited = true;
        }
        Ok(())
    }

    async fn wait(&mut self) -> Result<ExitReport, ExecError> {
        self.exited = true;
        Ok(ExitReport { code: Some(0) })
    }
}
