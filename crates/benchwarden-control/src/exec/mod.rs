//! External command execution.
//!
//! Every interaction with the bench goes through a [`CommandRunner`]: the
//! platform CLI, `git` probes and the supervisor process. Commands are
//! described by a [`CommandSpec`] and always inherit the parent environment.
//! Runs are bounded by a timeout; long-running processes are started with
//! [`CommandRunner::spawn`] and controlled through a [`ProcessHandle`].

mod scripted;
mod system;

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;

use crate::error::{ExecError, ExitReport};

pub use scripted::{ScriptedProcess, ScriptedResponse, ScriptedRunner};
pub use system::{SystemProcess, SystemRunner};

const SECRET_MASK: &str = "********";

/// How the standard streams of a command are wired.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StdioMode {
    /// Collect stdout and stderr.
    #[default]
    Capture,
    /// Pass stdout and stderr through to the parent.
    Inherit,
}

#[derive(Clone)]
struct Arg {
    value: String,
    secret: bool,
}

/// Description of an external command.
#[derive(Clone)]
pub struct CommandSpec {
    program: String,
    args: Vec<Arg>,
    cwd: Option<PathBuf>,
    env: Vec<(String, String)>,
    stdio: StdioMode,
    timeout: Option<Duration>,
}

impl CommandSpec {
    /// Create a command for a program.
    #[must_use]
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            cwd: None,
            env: Vec::new(),
            stdio: StdioMode::Capture,
            timeout: None,
        }
    }

    /// Append an argument.
    #[must_use]
    pub fn arg(mut self, value: impl Into<String>) -> Self {
        self.args.push(Arg {
            value: value.into(),
            secret: false,
        });
        self
    }

    /// Append several arguments.
    #[must_use]
    pub fn args<I, S>(mut self, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(values.into_iter().map(|v| Arg {
            value: v.into(),
            secret: false,
        }));
        self
    }

    /// Append an argument that is masked in logs and errors.
    #[must_use]
    pub fn secret_arg(mut self, value: impl Into<String>) -> Self {
        self.args.push(Arg {
            value: value.into(),
            secret: true,
        });
        self
    }

    /// Set the working directory.
    #[must_use]
    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }

    /// Add an environment variable on top of the inherited environment.
    #[must_use]
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    /// Pass the standard streams through to the parent.
    #[must_use]
    pub const fn inherit(mut self) -> Self {
        self.stdio = StdioMode::Inherit;
        self
    }

    /// Collect the standard streams.
    #[must_use]
    pub const fn capture(mut self) -> Self {
        self.stdio = StdioMode::Capture;
        self
    }

    /// Bound the run by a timeout, overriding the runner default.
    #[must_use]
    pub const fn timeout(mut self, limit: Duration) -> Self {
        self.timeout = Some(limit);
        self
    }

    /// Program name.
    #[must_use]
    pub fn program(&self) -> &str {
        &self.program
    }

    /// Unmasked argument values, in order.
    #[must_use]
    pub fn argv(&self) -> Vec<&str> {
        self.args.iter().map(|a| a.value.as_str()).collect()
    }

    /// Working directory, if set.
    #[must_use]
    pub fn cwd(&self) -> Option<&Path> {
        self.cwd.as_deref()
    }

    /// Extra environment variables.
    #[must_use]
    pub fn envs(&self) -> &[(String, String)] {
        &self.env
    }

    /// Environment variable value set on this command.
    #[must_use]
    pub fn env_value(&self, key: &str) -> Option<&str> {
        self.env
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Stream wiring.
    #[must_use]
    pub const fn stdio(&self) -> StdioMode {
        self.stdio
    }

    /// Explicit timeout, if set.
    #[must_use]
    pub const fn timeout_limit(&self) -> Option<Duration> {
        self.timeout
    }

    /// Command line with secret arguments masked.
    #[must_use]
    pub fn display(&self) -> String {
        let mut line = self.program.clone();
        for arg in &self.args {
            line.push(' ');
            if arg.secret {
                line.push_str(SECRET_MASK);
            } else {
                line.push_str(&arg.value);
            }
        }
        line
    }
}

impl fmt::Debug for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandSpec")
            .field("command", &self.display())
            .field("cwd", &self.cwd)
            .field("stdio", &self.stdio)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

/// Output of a command that ran to completion.
#[derive(Debug, Clone)]
pub struct CommandOutput {
    /// Exit status.
    pub status: ExitReport,
    /// Captured standard output (empty for inherited streams).
    pub stdout: String,
    /// Captured standard error (empty for inherited streams).
    pub stderr: String,
}

/// Runs external commands.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run a command to completion.
    ///
    /// A non-zero exit status is an error. Runs without an explicit timeout
    /// use the runner's default.
    async fn run(&self, spec: &CommandSpec) -> Result<CommandOutput, ExecError>;

    /// Start a long-running command without waiting for it.
    async fn spawn(&self, spec: &CommandSpec) -> Result<Box<dyn ProcessHandle>, ExecError>;
}

/// Handle to a process started by [`CommandRunner::spawn`].
#[async_trait]
pub trait ProcessHandle: Send + fmt::Debug {
    /// OS process id, absent once the process has been reaped.
    fn id(&self) -> Option<u32>;

    /// Masked command line the process was started with.
    fn command(&self) -> &str;

    /// Send SIGTERM and wait up to `grace` for exit, then kill.
    ///
    /// A process that has already exited counts as terminated.
    async fn terminate(&mut self, grace: Duration) -> Result<(), ExecError>;

    /// Wait for the process to exit.
    async fn wait(&mut self) -> Result<ExitReport, ExecError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_masks_secret_arguments() {
        let spec = CommandSpec::new("bench")
            .args(["drop-site", "a.local", "--force", "--root-password"])
            .secret_arg("hunter2");
        assert_eq!(
            spec.display(),
            "bench drop-site a.local --force --root-password ********"
        );
        assert_eq!(spec.argv().last(), Some(&"hunter2"));
        assert!(!format!("{spec:?}").contains("hunter2"));
    }

    #[test]
    fn env_values_are_looked_up_by_key() {
        let spec = CommandSpec::new("bash")
            .env("DEPLOYMENT", "production")
            .env("BENCH_DIR", "/bench");
        assert_eq!(spec.env_value("BENCH_DIR"), Some("/bench"));
        assert_eq!(spec.env_value("MISSING"), None);
    }

    #[test]
    fn capture_is_the_default_stdio() {
        let spec = CommandSpec::new("git");
        assert_eq!(spec.stdio(), StdioMode::Capture);
        assert_eq!(spec.inherit().stdio(), StdioMode::Inherit);
    }
}
