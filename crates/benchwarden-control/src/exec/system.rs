//! Command runner backed by real OS processes.

use std::fmt;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use nix::errno::Errno;
use nix::sys::signal::{Signal, kill};
use nix::unistd::Pid;
use tokio::process::{Child, Command};
use tracing::{debug, warn};

use super::{CommandOutput, CommandRunner, CommandSpec, ProcessHandle, StdioMode};
use crate::error::{ExecError, ExitReport};

/// Runs commands with `tokio::process`.
#[derive(Debug, Clone)]
pub struct SystemRunner {
    default_timeout: Duration,
}

impl SystemRunner {
    /// Create a runner applying `default_timeout` to runs without their own.
    #[must_use]
    pub const fn new(default_timeout: Duration) -> Self {
        Self { default_timeout }
    }

    fn command(spec: &CommandSpec) -> Command {
        let mut cmd = Command::new(spec.program());
        cmd.args(spec.argv());
        if let Some(dir) = spec.cwd() {
            cmd.current_dir(dir);
        }
        cmd.envs(spec.envs().iter().map(|(k, v)| (k.as_str(), v.as_str())));
        cmd
    }
}

#[async_trait]
impl CommandRunner for SystemRunner {
    async fn run(&self, spec: &CommandSpec) -> Result<CommandOutput, ExecError> {
        let command = spec.display();
        let limit = spec.timeout_limit().unwrap_or(self.default_timeout);
        debug!(command = %command, cwd = ?spec.cwd(), "running command");

        let mut cmd = Self::command(spec);
        cmd.stdin(Stdio::null()).kill_on_drop(true);

        let timed_out = || ExecError::Timeout {
            command: command.clone(),
            timeout_secs: limit.as_secs(),
        };

        match spec.stdio() {
            StdioMode::Capture => {
                cmd.stdout(Stdio::piped()).stderr(Stdio::piped());
                let output = tokio::time::timeout(limit, cmd.output())
                    .await
                    .map_err(|_| timed_out())?
                    .map_err(|source| ExecError::Spawn {
                        command: command.clone(),
                        source,
                    })?;

                let status = ExitReport::from(output.status);
                let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
                let stderr = String::from_utf8_lossy(&output.stderr).into_owned();

                if !status.success() {
                    return Err(ExecError::Failed {
                        command,
                        status,
                        stderr: stderr.trim().to_owned(),
                    });
                }

                Ok(CommandOutput {
                    status,
                    stdout,
                    stderr,
                })
            }
            StdioMode::Inherit => {
                cmd.stdout(Stdio::inherit()).stderr(Stdio::inherit());
                let mut child = cmd.spawn().map_err(|source| ExecError::Spawn {
                    command: command.clone(),
                    source,
                })?;

                let status = match tokio::time::timeout(limit, child.wait()).await {
                    Ok(Ok(status)) => ExitReport::from(status),
                    Ok(Err(source)) => return Err(ExecError::Wait { command, source }),
                    Err(_) => {
                        warn!(command = %command, "command timed out, killing");
                        if let Err(e) = child.kill().await {
                            warn!(command = %command, error = %e, "failed to kill timed out command");
                        }
                        return Err(timed_out());
                    }
                };

                if !status.success() {
                    return Err(ExecError::Failed {
                        command,
                        status,
                        stderr: String::new(),
                    });
                }

                Ok(CommandOutput {
                    status,
                    stdout: String::new(),
                    stderr: String::new(),
                })
            }
        }
    }

    async fn spawn(&self, spec: &CommandSpec) -> Result<Box<dyn ProcessHandle>, ExecError> {
        let command = spec.display();
        debug!(command = %command, cwd = ?spec.cwd(), "starting process");

        let mut cmd = Self::command(spec);
        cmd.stdin(Stdio::null());
        match spec.stdio() {
            StdioMode::Inherit => {
                cmd.stdout(Stdio::inherit()).stderr(Stdio::inherit());
            }
            StdioMode::Capture => {
                cmd.stdout(Stdio::null()).stderr(Stdio::null());
            }
        }

        let child = cmd.spawn().map_err(|source| ExecError::Spawn {
            command: command.clone(),
            source,
        })?;

        debug!(command = %command, pid = ?child.id(), "process started");
        Ok(Box::new(SystemProcess { child, command }))
    }
}

/// A process started by [`SystemRunner`].
pub struct SystemProcess {
    child: Child,
    command: String,
}

impl fmt::Debug for SystemProcess {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SystemProcess")
            .field("pid", &self.child.id())
            .field("command", &self.command)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl ProcessHandle for SystemProcess {
    fn id(&self) -> Option<u32> {
        self.child.id()
    }

    fn command(&self) -> &str {
        &self.command
    }

    async fn terminate(&mut self, grace: Duration) -> Result<(), ExecError> {
        let Some(raw) = self.child.id() else {
            return Ok(());
        };
        let pid = i32::try_from(raw).map_err(|_| ExecError::Signal {
            command: self.command.clone(),
            reason: format!("pid {raw} out of range"),
        })?;

        match kill(Pid::from_raw(pid), Signal::SIGTERM) {
            Ok(()) => {}
            Err(Errno::ESRCH) => return Ok(()),
            Err(errno) => {
                return Err(ExecError::Signal {
                    command: self.command.clone(),
                    reason: errno.to_string(),
                });
            }
        }

        match tokio::time::timeout(grace, self.child.wait()).await {
            Ok(Ok(status)) => {
                debug!(command = %self.command, status = %ExitReport::from(status), "process exited");
                Ok(())
            }
            Ok(Err(source)) => Err(ExecError::Wait {
                command: self.command.clone(),
                source,
            }),
            Err(_) => {
                warn!(command = %self.command, grace_secs = grace.as_secs(), "process did not exit in time, killing");
                self.child.kill().await.map_err(|source| ExecError::Wait {
                    command: self.command.clone(),
                    source,
                })
            }
        }
    }

    async fn wait(&mut self) -> Result<ExitReport, ExecError> {
        self.child
            .wait()
            .await
            .map(ExitReport::from)
            .map_err(|source| ExecError::Wait {
                command: self.command.clone(),
                source,
            })
    }
}
