//! Error types for benchwarden-control.

use std::fmt;
use std::path::PathBuf;

/// Result type alias using [`ControlError`].
pub type ControlResult<T> = Result<T, ControlError>;

/// Boxed error used where a failure may come from more than one layer.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Exit status of a finished external command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitReport {
    /// Exit code, absent when the process was terminated by a signal.
    pub code: Option<i32>,
}

impl ExitReport {
    /// Whether the process exited with code zero.
    #[must_use]
    pub const fn success(&self) -> bool {
        matches!(self.code, Some(0))
    }
}

impl From<std::process::ExitStatus> for ExitReport {
    fn from(status: std::process::ExitStatus) -> Self {
        Self {
            code: status.code(),
        }
    }
}

impl fmt::Display for ExitReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.code {
            Some(code) => write!(f, "exit code {code}"),
            None => write!(f, "termination by signal"),
        }
    }
}

/// Errors raised while running external commands.
#[derive(Debug, thiserror::Error)]
pub enum ExecError {
    /// The program could not be started.
    #[error("failed to spawn `{command}`: {source}")]
    Spawn {
        /// Masked command line.
        command: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The program ran and reported failure.
    #[error("`{command}` failed with {status}: {stderr}")]
    Failed {
        /// Masked command line.
        command: String,
        /// Exit status.
        status: ExitReport,
        /// Captured standard error (empty for inherited streams).
        stderr: String,
    },

    /// The program did not finish within its time limit.
    #[error("`{command}` timed out after {timeout_secs}s")]
    Timeout {
        /// Masked command line.
        command: String,
        /// Limit that was exceeded.
        timeout_secs: u64,
    },

    /// Delivering a signal to a running program failed.
    #[error("failed to signal `{command}`: {reason}")]
    Signal {
        /// Masked command line.
        command: String,
        /// Reason reported by the OS.
        reason: String,
    },

    /// Waiting for a running program failed.
    #[error("failed to wait for `{command}`: {source}")]
    Wait {
        /// Masked command line.
        command: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
}

impl ExecError {
    /// Whether the failure was a timeout.
    #[must_use]
    pub const fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}

/// One failed attempt to fetch an application from a given source.
#[derive(Debug)]
pub struct FetchAttemptError {
    /// Source locator that was tried.
    pub locator: String,
    /// Why the attempt failed.
    pub error: ExecError,
}

fn join_attempts(attempts: &[FetchAttemptError]) -> String {
    attempts
        .iter()
        .map(|a| format!("[{}] {}", a.locator, a.error))
        .collect::<Vec<_>>()
        .join("; ")
}

/// Errors that can occur while managing the bench.
#[derive(Debug, thiserror::Error)]
pub enum ControlError {
    /// A dependency never became reachable.
    #[error("{target} not ready: {last_error}")]
    Unready {
        /// Dependency description.
        target: String,
        /// Last probe failure.
        last_error: String,
    },

    /// The workspace directory tree could not be read.
    #[error("workspace unreadable at {}: {source}", path.display())]
    WorkspaceUnreadable {
        /// Directory being read.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// Listing installed applications of a site failed.
    #[error("failed to query apps of site {site}: {source}")]
    QueryFailed {
        /// Site name.
        site: String,
        /// Underlying command error.
        #[source]
        source: ExecError,
    },

    /// Every fetch source for an application failed.
    #[error("failed to fetch app {app}: {}", join_attempts(.attempts))]
    FetchFailed {
        /// Application name.
        app: String,
        /// Each attempt in the order tried.
        attempts: Vec<FetchAttemptError>,
    },

    /// A partial application checkout could not be removed before a retry.
    #[error("failed to remove partial checkout of {app} at {}: {source}", path.display())]
    CleanupFailed {
        /// Application name.
        app: String,
        /// Directory that could not be removed.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// Creating a site failed.
    #[error("failed to create site {site}: {source}")]
    SiteCreateFailed {
        /// Site name.
        site: String,
        /// Underlying command error.
        #[source]
        source: ExecError,
    },

    /// Dropping a site failed.
    #[error("failed to drop site {site}: {source}")]
    SiteDropFailed {
        /// Site name.
        site: String,
        /// Underlying command error.
        #[source]
        source: ExecError,
    },

    /// Installing an application failed after the fetch-and-retry.
    #[error("failed to install {app} on {site}: {source}")]
    InstallFailed {
        /// Site name.
        site: String,
        /// Application name.
        app: String,
        /// Final failure.
        #[source]
        source: BoxError,
    },

    /// Uninstalling an application failed.
    #[error("failed to uninstall {app} from {site}: {source}")]
    UninstallFailed {
        /// Site name.
        site: String,
        /// Application name.
        app: String,
        /// Underlying command error.
        #[source]
        source: ExecError,
    },

    /// Migrating a site failed.
    #[error("failed to migrate site {site}: {source}")]
    MigrateFailed {
        /// Site name.
        site: String,
        /// Underlying command error.
        #[source]
        source: ExecError,
    },

    /// Regenerating proxy or supervisor configuration failed.
    #[error("config regeneration failed at {step}: {source}")]
    RegenerateFailed {
        /// Step that failed.
        step: &'static str,
        /// Underlying failure.
        #[source]
        source: BoxError,
    },

    /// A runtime mode is already running.
    #[error("{mode} is already running")]
    AlreadyRunning {
        /// Running mode.
        mode: &'static str,
    },

    /// Control was handed to the external shell; starting is forbidden.
    #[error("deployment is delegated to the external shell")]
    AlreadyUnmanaged,

    /// No process of the requested mode is running.
    #[error("{mode} is not running")]
    NotRunning {
        /// Requested mode.
        mode: &'static str,
    },

    /// Restart requested while delegated to the external shell.
    #[error("cannot restart an unmanaged deployment")]
    Unmanaged,

    /// Restart requested while nothing is running.
    #[error("nothing to restart: deployment is stopped")]
    NothingToRestart,

    /// An external command exceeded its time limit.
    #[error("`{command}` timed out after {timeout_secs}s")]
    Timeout {
        /// Masked command line.
        command: String,
        /// Limit that was exceeded.
        timeout_secs: u64,
    },

    /// The named site does not exist.
    #[error("site not found: {0}")]
    SiteNotFound(String),

    /// The named site already exists.
    #[error("site already exists: {0}")]
    SiteAlreadyExists(String),

    /// The site name cannot be used as a directory name.
    #[error("invalid site name: {0:?}")]
    InvalidSiteName(String),

    /// The application name is not a plain package name.
    #[error("invalid app name: {0:?}")]
    InvalidAppName(String),

    /// An external command failed outside a more specific operation.
    #[error(transparent)]
    Exec(ExecError),

    /// Filesystem error.
    #[error("I/O error at {}: {source}", path.display())]
    Io {
        /// Path involved.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// Internal error.
    #[error("internal error: {0}")]
    Internal(String),
}

impl From<ExecError> for ControlError {
    fn from(err: ExecError) -> Self {
        Self::from_exec(err, Self::Exec)
    }
}

impl ControlError {
    /// Wrap a command error, surfacing timeouts as [`ControlError::Timeout`].
    pub fn from_exec(err: ExecError, wrap: impl FnOnce(ExecError) -> Self) -> Self {
        match err {
            ExecError::Timeout {
                command,
                timeout_secs,
            } => Self::Timeout {
                command,
                timeout_secs,
            },
            other => wrap(other),
        }
    }

    /// Create an I/O error for a path.
    #[must_use]
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Create a regeneration error.
    #[must_use]
    pub fn regenerate(step: &'static str, source: impl Into<BoxError>) -> Self {
        Self::RegenerateFailed {
            step,
            source: source.into(),
        }
    }

    /// Create an internal error.
    #[must_use]
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Stable identifier for the error kind.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Unready { .. } => "unready",
            Self::WorkspaceUnreadable { .. } => "workspace_unreadable",
            Self::QueryFailed { .. } => "query_failed",
            Self::FetchFailed { .. } => "fetch_failed",
            Self::CleanupFailed { .. } => "cleanup_failed",
            Self::SiteCreateFailed { .. } => "site_create_failed",
            Self::SiteDropFailed { .. } => "site_drop_failed",
            Self::InstallFailed { .. } => "install_failed",
            Self::UninstallFailed { .. } => "uninstall_failed",
            Self::MigrateFailed { .. } => "migrate_failed",
            Self::RegenerateFailed { .. } => "regenerate_failed",
            Self::AlreadyRunning { .. } => "already_running",
            Self::AlreadyUnmanaged => "already_unmanaged",
            Self::NotRunning { .. } => "not_running",
            Self::Unmanaged => "unmanaged",
            Self::NothingToRestart => "nothing_to_restart",
            Self::Timeout { .. } => "timeout",
            Self::SiteNotFound(_) => "site_not_found",
            Self::SiteAlreadyExists(_) => "site_already_exists",
            Self::InvalidSiteName(_) => "invalid_site_name",
            Self::InvalidAppName(_) => "invalid_app_name",
            Self::Exec(_) => "command_failed",
            Self::Io { .. } => "io",
            Self::Config(_) => "config",
            Self::Internal(_) => "internal",
        }
    }
}
