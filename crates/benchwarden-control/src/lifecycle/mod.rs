//! Deployment lifecycle.
//!
//! The bench runs in exactly one mode at a time:
//!
//! ```text
//!            start_development            start_production
//! RunningDevelopment ◀──────── Stopped ────────▶ RunningProduction
//!            └──── stop_development ─▶ ◀─ stop_production ────┘
//!
//! any state ── delegate_to_external_shell ──▶ Unmanaged (terminal)
//! ```
//!
//! All transitions go through [`LifecycleManager`], which serialises them
//! behind one lock. Production start regenerates proxy and supervisor
//! configuration while holding that lock.

mod manager;
mod regenerate;

use std::fmt;

use serde::Serialize;

pub use manager::LifecycleManager;
pub use regenerate::{
    BenchConfigRegenerator, ConfigRegenerator, insert_log_format, merge_supervisor_conf,
    patch_server_name,
};

/// A runtime mode that serves the bench.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DeploymentMode {
    /// `bench start` in the foreground.
    Development,
    /// `supervisord` behind nginx.
    Production,
}

impl DeploymentMode {
    /// Mode for a selector string: `production` selects production,
    /// anything else development.
    #[must_use]
    pub fn from_selector(selector: &str) -> Self {
        if selector == "production" {
            Self::Production
        } else {
            Self::Development
        }
    }

    /// Lowercase name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Development => "development",
            Self::Production => "production",
        }
    }
}

impl fmt::Display for DeploymentMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which state the lifecycle is in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StateKind {
    /// Delegated to the external shell.
    Unmanaged,
    /// Nothing running.
    Stopped,
    /// Development process running.
    RunningDevelopment,
    /// Supervisor running.
    RunningProduction,
}

impl StateKind {
    /// Lowercase name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Unmanaged => "unmanaged",
            Self::Stopped => "stopped",
            Self::RunningDevelopment => "running_development",
            Self::RunningProduction => "running_production",
        }
    }
}

/// Snapshot of the lifecycle for readers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DeploymentStatus {
    /// Current state.
    pub state: StateKind,
    /// Pid of the owned process, if any.
    pub pid: Option<u32>,
}

impl DeploymentStatus {
    /// Status of a lifecycle that owns nothing.
    #[must_use]
    pub const fn stopped() -> Self {
        Self {
            state: StateKind::Stopped,
            pid: None,
        }
    }
}
