//! The lifecycle state machine.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, watch};
use tracing::{info, warn};

use super::{ConfigRegenerator, DeploymentMode, DeploymentStatus, StateKind};
use crate::config::ProductionConfig;
use crate::error::{ControlError, ControlResult};
use crate::exec::{CommandRunner, CommandSpec, ProcessHandle};
use crate::workspace::Workspace;

enum DeploymentState {
    Unmanaged,
    Stopped,
    Development(Box<dyn ProcessHandle>),
    Production(Box<dyn ProcessHandle>),
}

impl DeploymentState {
    fn running(mode: DeploymentMode, handle: Box<dyn ProcessHandle>) -> Self {
        match mode {
            DeploymentMode::Development => Self::Development(handle),
            DeploymentMode::Production => Self::Production(handle),
        }
    }

    fn status(&self) -> DeploymentStatus {
        match self {
            Self::Unmanaged => DeploymentStatus {
                state: StateKind::Unmanaged,
                pid: None,
            },
            Self::Stopped => DeploymentStatus::stopped(),
            Self::Development(handle) => DeploymentStatus {
                state: StateKind::RunningDevelopment,
                pid: handle.id(),
            },
            Self::Production(handle) => DeploymentStatus {
                state: StateKind::RunningProduction,
                pid: handle.id(),
            },
        }
    }
}

/// Owns the runtime mode of the bench and its process handle.
///
/// Every transition takes the same lock, so start, stop, restart and
/// delegation are linearizable. Readers use [`LifecycleManager::status`],
/// which never waits on a transition in progress.
pub struct LifecycleManager {
    workspace: Workspace,
    runner: Arc<dyn CommandRunner>,
    regenerator: Arc<dyn ConfigRegenerator>,
    production: ProductionConfig,
    stop_grace: Duration,
    state: Mutex<DeploymentState>,
    status: watch::Sender<DeploymentStatus>,
}

impl std::fmt::Debug for LifecycleManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LifecycleManager")
            .field("workspace", &self.workspace)
            .field("status", &self.status())
            .finish_non_exhaustive()
    }
}

impl LifecycleManager {
    /// Create a manager in the `Stopped` state.
    #[must_use]
    pub fn new(
        workspace: Workspace,
        runner: Arc<dyn CommandRunner>,
        regenerator: Arc<dyn ConfigRegenerator>,
        production: ProductionConfig,
        stop_grace: Duration,
    ) -> Self {
        let (status, _) = watch::channel(DeploymentStatus::stopped());
        Self {
            workspace,
            runner,
            regenerator,
            production,
            stop_grace,
            state: Mutex::new(DeploymentState::Stopped),
            status,
        }
    }

    /// Current state snapshot.
    #[must_use]
    pub fn status(&self) -> DeploymentStatus {
        *self.status.borrow()
    }

    /// Receiver notified on every transition.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<DeploymentStatus> {
        self.status.subscribe()
    }

    fn publish(&self, state: &DeploymentState) {
        self.status.send_replace(state.status());
    }

    /// Hand the bench over to the external service script.
    ///
    /// Any running process is stopped first. The script's handle is returned
    /// to the caller and not kept; no further transitions are accepted.
    pub async fn delegate_to_external_shell(
        &self,
        mode: DeploymentMode,
    ) -> ControlResult<Box<dyn ProcessHandle>> {
        let mut state = self.state.lock().await;

        let running = match &*state {
            DeploymentState::Unmanaged => return Err(ControlError::AlreadyUnmanaged),
            DeploymentState::Development(_) => Some(DeploymentMode::Development),
            DeploymentState::Production(_) => Some(DeploymentMode::Production),
            DeploymentState::Stopped => None,
        };
        if let Some(current) = running {
            self.stop_locked(&mut state, current).await?;
        }

        let spec = CommandSpec::new("bash")
            .arg(self.production.service_script.to_string_lossy())
            .current_dir(self.workspace.root())
            .env("BENCH_DIR", self.workspace.root().to_string_lossy())
            .env("DEPLOYMENT", mode.as_str())
            .env(
                "MERGED_SUPERVISOR_CONF",
                self.production.shell_merged_supervisor_conf.to_string_lossy(),
            )
            .env(
                "HEAD_PATCH_CONF",
                self.production.supervisor_header.to_string_lossy(),
            )
            .inherit();

        let handle = self.runner.spawn(&spec).await?;
        *state = DeploymentState::Unmanaged;
        self.publish(&state);
        info!(mode = %mode, pid = ?handle.id(), "delegated to external shell");
        Ok(handle)
    }

    /// Start `bench start`.
    pub async fn start_development(&self) -> ControlResult<()> {
        let mut state = self.state.lock().await;
        self.start_locked(&mut state, DeploymentMode::Development).await
    }

    /// Stop the development process.
    pub async fn stop_development(&self) -> ControlResult<()> {
        let mut state = self.state.lock().await;
        self.stop_locked(&mut state, DeploymentMode::Development).await
    }

    /// Regenerate configuration and start the supervisor.
    pub async fn start_production(&self) -> ControlResult<()> {
        let mut state = self.state.lock().await;
        self.start_locked(&mut state, DeploymentMode::Production).await
    }

    /// Stop the supervisor.
    pub async fn stop_production(&self) -> ControlResult<()> {
        let mut state = self.state.lock().await;
        self.stop_locked(&mut state, DeploymentMode::Production).await
    }

    /// Start the given mode.
    pub async fn start(&self, mode: DeploymentMode) -> ControlResult<()> {
        let mut state = self.state.lock().await;
        self.start_locked(&mut state, mode).await
    }

    /// Stop and start the running mode so it picks up bench changes.
    pub async fn restart(&self) -> ControlResult<()> {
        let mut state = self.state.lock().await;
        let mode = match &*state {
            DeploymentState::Unmanaged => return Err(ControlError::Unmanaged),
            DeploymentState::Stopped => return Err(ControlError::NothingToRestart),
            DeploymentState::Development(_) => DeploymentMode::Development,
            DeploymentState::Production(_) => DeploymentMode::Production,
        };

        info!(mode = %mode, "restarting");
        self.stop_locked(&mut state, mode).await?;
        self.start_locked(&mut state, mode).await
    }

    /// Stop whatever is running. Stopped and unmanaged states are left as is.
    pub async fn shutdown(&self) -> ControlResult<()> {
        let mut state = self.state.lock().await;
        let mode = match &*state {
            DeploymentState::Development(_) => DeploymentMode::Development,
            DeploymentState::Production(_) => DeploymentMode::Production,
            DeploymentState::Stopped | DeploymentState::Unmanaged => return Ok(()),
        };
        self.stop_locked(&mut state, mode).await
    }

    async fn start_locked(
        &self,
        state: &mut DeploymentState,
        mode: DeploymentMode,
    ) -> ControlResult<()> {
        match state {
            DeploymentState::Unmanaged => return Err(ControlError::AlreadyUnmanaged),
            DeploymentState::Development(_) => {
                return Err(ControlError::AlreadyRunning {
                    mode: DeploymentMode::Development.as_str(),
                });
            }
            DeploymentState::Production(_) => {
                return Err(ControlError::AlreadyRunning {
                    mode: DeploymentMode::Production.as_str(),
                });
            }
            DeploymentState::Stopped => {}
        }

        let spec = match mode {
            DeploymentMode::Development => self.workspace.bench().arg("start").inherit(),
            DeploymentMode::Production => {
                let merged = self.regenerator.regenerate().await?;
                self.supervisor_command(&merged)
            }
        };

        let handle = self.runner.spawn(&spec).await?;
        info!(mode = %mode, pid = ?handle.id(), command = %handle.command(), "started");
        *state = DeploymentState::running(mode, handle);
        self.publish(state);
        Ok(())
    }

    async fn stop_locked(
        &self,
        state: &mut DeploymentState,
        mode: DeploymentMode,
    ) -> ControlResult<()> {
        let current = std::mem::replace(state, DeploymentState::Stopped);
        let mut handle = match (current, mode) {
            (DeploymentState::Development(handle), DeploymentMode::Development)
            | (DeploymentState::Production(handle), DeploymentMode::Production) => handle,
            (DeploymentState::Unmanaged, _) => {
                *state = DeploymentState::Unmanaged;
                return Err(ControlError::AlreadyUnmanaged);
            }
            (other, _) => {
                *state = other;
                return Err(ControlError::NotRunning {
                    mode: mode.as_str(),
                });
            }
        };

        if let Err(e) = handle.terminate(self.stop_grace).await {
            warn!(mode = %mode, error = %e, "failed to stop process");
            *state = DeploymentState::running(mode, handle);
            return Err(e.into());
        }

        info!(mode = %mode, "stopped");
        self.publish(state);
        Ok(())
    }

    fn supervisor_command(&self, merged: &std::path::Path) -> CommandSpec {
        let bin = self.production.supervisord_bin.as_str();
        let spec = if self.production.use_sudo {
            CommandSpec::new("sudo").arg(bin)
        } else {
            CommandSpec::new(bin)
        };
        spec.arg("-c")
            .arg(merged.to_string_lossy())
            .current_dir(self.workspace.root())
            .inherit()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;

    use super::*;
    use crate::exec::{ScriptedResponse, ScriptedRunner};

    #[derive(Default)]
    struct CountingRegenerator {
        calls: AtomicUsize,
        active: AtomicUsize,
        overlapped: AtomicUsize,
    }

    #[async_trait]
    impl ConfigRegenerator for CountingRegenerator {
        async fn regenerate(&self) -> ControlResult<PathBuf> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.active.fetch_add(1, Ordering::SeqCst) > 0 {
                self.overlapped.fetch_add(1, Ordering::SeqCst);
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
            self.active.fetch_sub(1, Ordering::SeqCst);
            Ok(PathBuf::from("/tmp/supervisor-merged.tmp"))
        }
    }

    struct Harness {
        runner: Arc<ScriptedRunner>,
        regenerator: Arc<CountingRegenerator>,
        manager: Arc<LifecycleManager>,
    }

    fn harness_with(runner: ScriptedRunner) -> Harness {
        let runner = Arc::new(runner);
        let regenerator = Arc::new(CountingRegenerator::default());
        let manager = Arc::new(LifecycleManager::new(
            Workspace::new("/bench"),
            runner.clone(),
            regenerator.clone(),
            ProductionConfig::default(),
            Duration::from_secs(1),
        ));
        Harness {
            runner,
            regenerator,
            manager,
        }
    }

    fn harness() -> Harness {
        harness_with(ScriptedRunner::succeeding())
    }

    #[tokio::test]
    async fn development_round_trip_returns_to_stopped() {
        let h = harness();
        h.manager.start_development().await.unwrap();
        let status = h.manager.status();
        assert_eq!(status.state, StateKind::RunningDevelopment);
        let pid = status.pid.unwrap();

        h.manager.stop_development().await.unwrap();
        assert_eq!(h.manager.status(), DeploymentStatus::stopped());
        assert_eq!(h.runner.terminated(), [pid]);
        assert_eq!(h.runner.command_lines(), ["bench start"]);
    }

    #[tokio::test]
    async fn stopping_when_stopped_is_not_running() {
        let h = harness();
        let err = h.manager.stop_development().await.unwrap_err();
        assert!(matches!(err, ControlError::NotRunning { mode: "development" }));
        let err = h.manager.stop_production().await.unwrap_err();
        assert!(matches!(err, ControlError::NotRunning { mode: "production" }));
    }

    #[tokio::test]
    async fn second_start_is_already_running() {
        let h = harness();
        h.manager.start_development().await.unwrap();
        let err = h.manager.start_development().await.unwrap_err();
        assert_eq!(err.kind(), "already_running");
        let err = h.manager.start_production().await.unwrap_err();
        assert!(matches!(err, ControlError::AlreadyRunning { mode: "development" }));
        assert_eq!(h.regenerator.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn stopping_the_other_mode_leaves_process_running() {
        let h = harness();
        h.manager.start_production().await.unwrap();
        let err = h.manager.stop_development().await.unwrap_err();
        assert_eq!(err.kind(), "not_running");
        assert_eq!(h.manager.status().state, StateKind::RunningProduction);
        assert!(h.runner.terminated().is_empty());
    }

    #[tokio::test]
    async fn production_start_regenerates_then_runs_supervisor() {
        let h = harness();
        h.manager.start_production().await.unwrap();
        assert_eq!(h.regenerator.calls.load(Ordering::SeqCst), 1);
        assert_eq!(
            h.runner.command_lines(),
            ["sudo supervisord -c /tmp/supervisor-merged.tmp"]
        );
        h.manager.stop_production().await.unwrap();
        assert_eq!(h.manager.status().state, StateKind::Stopped);
    }

    #[tokio::test]
    async fn failed_regeneration_stays_stopped() {
        struct Failing;
        #[async_trait]
        impl ConfigRegenerator for Failing {
            async fn regenerate(&self) -> ControlResult<PathBuf> {
                Err(ControlError::regenerate(
                    "setup nginx",
                    std::io::Error::other("boom"),
                ))
            }
        }

        let runner = Arc::new(ScriptedRunner::succeeding());
        let manager = LifecycleManager::new(
            Workspace::new("/bench"),
            runner.clone(),
            Arc::new(Failing),
            ProductionConfig::default(),
            Duration::from_secs(1),
        );
        let err = manager.start_production().await.unwrap_err();
        assert_eq!(err.kind(), "regenerate_failed");
        assert_eq!(manager.status().state, StateKind::Stopped);
        assert!(runner.calls().is_empty());
    }

    #[tokio::test]
    async fn restart_cycles_the_running_mode() {
        let h = harness();
        h.manager.start_production().await.unwrap();
        let first = h.manager.status().pid.unwrap();

        h.manager.restart().await.unwrap();

        let status = h.manager.status();
        assert_eq!(status.state, StateKind::RunningProduction);
        assert_ne!(status.pid, Some(first));
        assert_eq!(h.runner.terminated(), [first]);
        assert_eq!(h.regenerator.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn restart_when_stopped_is_nothing_to_restart() {
        let h = harness();
        let err = h.manager.restart().await.unwrap_err();
        assert_eq!(err.kind(), "nothing_to_restart");
    }

    #[tokio::test]
    async fn delegation_is_terminal() {
        let h = harness();
        h.manager.start_development().await.unwrap();
        let dev_pid = h.manager.status().pid.unwrap();

        let handle = h
            .manager
            .delegate_to_external_shell(DeploymentMode::Production)
            .await
            .unwrap();
        assert!(handle.id().is_some());
        assert_eq!(h.runner.terminated(), [dev_pid]);
        assert_eq!(h.manager.status().state, StateKind::Unmanaged);

        let script = h.runner.calls().pop().unwrap();
        assert_eq!(script.display(), "bash /scripts/service.sh");
        assert_eq!(script.env_value("DEPLOYMENT"), Some("production"));
        assert_eq!(script.env_value("BENCH_DIR"), Some("/bench"));
        assert_eq!(
            script.env_value("MERGED_SUPERVISOR_CONF"),
            Some("/supervisor-merged.conf")
        );
        assert_eq!(
            script.env_value("HEAD_PATCH_CONF"),
            Some("/patches/head.patch.conf")
        );

        for err in [
            h.manager.start_development().await.unwrap_err(),
            h.manager.start_production().await.unwrap_err(),
            h.manager.stop_development().await.unwrap_err(),
            h.manager.stop_production().await.unwrap_err(),
        ] {
            assert_eq!(err.kind(), "already_unmanaged");
        }
        assert_eq!(h.manager.restart().await.unwrap_err().kind(), "unmanaged");
        assert_eq!(
            h.manager
                .delegate_to_external_shell(DeploymentMode::Development)
                .await
                .unwrap_err()
                .kind(),
            "already_unmanaged"
        );
        h.manager.shutdown().await.unwrap();
        assert_eq!(h.manager.status().state, StateKind::Unmanaged);
    }

    #[tokio::test]
    async fn failed_spawn_leaves_state_stopped() {
        let h = harness_with(ScriptedRunner::new(|_| ScriptedResponse::fail("bench: not found")));
        let err = h.manager.start_development().await.unwrap_err();
        assert_eq!(err.kind(), "command_failed");
        assert_eq!(h.manager.status(), DeploymentStatus::stopped());
    }

    #[tokio::test]
    async fn concurrent_restarts_never_overlap_regeneration() {
        let h = harness();
        h.manager.start_production().await.unwrap();

        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let manager = Arc::clone(&h.manager);
                tokio::spawn(async move { manager.restart().await })
            })
            .collect();
        for task in tasks {
            task.await.unwrap().unwrap();
        }

        assert_eq!(h.regenerator.overlapped.load(Ordering::SeqCst), 0);
        assert_eq!(h.regenerator.calls.load(Ordering::SeqCst), 9);
        assert_eq!(h.runner.terminated().len(), 8);
        assert_eq!(h.manager.status().state, StateKind::RunningProduction);
    }

    #[tokio::test]
    async fn subscribers_see_transitions() {
        let h = harness();
        let mut rx = h.manager.subscribe();
        h.manager.start_development().await.unwrap();
        rx.changed().await.unwrap();
        assert_eq!(rx.borrow().state, StateKind::RunningDevelopment);
    }
}
