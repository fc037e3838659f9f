//! Service lifecycle management.
//!
//! Provides the main service runner with signal handling and graceful shutdown.

use std::sync::Arc;

use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::api;
use crate::config::{ControlConfig, ProductionConfig};
use crate::error::{ControlError, ControlResult};
use crate::exec::{CommandRunner, SystemRunner};
use crate::instance::{CommonSiteConfig, InstanceManifest};
use crate::lifecycle::{BenchConfigRegenerator, LifecycleManager};
use crate::orchestrator::BenchOrchestrator;
use crate::provisioner::{AppProvisioner, SiteCredentials};
use crate::readiness;
use crate::reconcile::{ReconcilePolicy, ReconcileReport, Reconciler};
use crate::workspace::{Workspace, WorkspaceInspector, ensure_workspace};

/// Every component wired from one configuration and manifest.
#[derive(Debug, Clone)]
pub struct Components {
    /// Bench layout.
    pub workspace: Workspace,
    /// Reconciler shared with the HTTP API.
    pub reconciler: Arc<Reconciler>,
    /// Lifecycle manager shared with the HTTP API.
    pub lifecycle: Arc<LifecycleManager>,
    /// Orchestrator behind the HTTP API.
    pub orchestrator: Arc<BenchOrchestrator>,
}

impl Components {
    /// Build the components on top of `runner`.
    #[must_use]
    pub fn build(
        config: &ControlConfig,
        manifest: &InstanceManifest,
        runner: Arc<dyn CommandRunner>,
    ) -> Self {
        let workspace = Workspace::from_config(&config.workspace);

        let inspector = WorkspaceInspector::new(
            workspace.clone(),
            Arc::clone(&runner),
            config.exec.probe_timeout(),
        );
        let provisioner = AppProvisioner::new(workspace.clone(), Arc::clone(&runner))
            .with_credentials(SiteCredentials::from_config(
                &config.database,
                &config.provisioner,
            ))
            .with_branch(manifest.frappe_branch.clone())
            .with_fallback_base(config.provisioner.fallback_source_base.clone());
        let reconciler = Arc::new(Reconciler::new(
            inspector,
            provisioner,
            ReconcilePolicy::from(&config.reconcile),
        ));

        let production = production_config(config, manifest);
        let regenerator = Arc::new(BenchConfigRegenerator::new(
            workspace.clone(),
            Arc::clone(&runner),
            production.clone(),
        ));
        let lifecycle = Arc::new(LifecycleManager::new(
            workspace.clone(),
            runner,
            regenerator,
            production,
            config.lifecycle.stop_grace(),
        ));

        let orchestrator = Arc::new(BenchOrchestrator::new(
            Arc::clone(&reconciler),
            Arc::clone(&lifecycle),
        ));

        Self {
            workspace,
            reconciler,
            lifecycle,
            orchestrator,
        }
    }
}

/// The bench control service.
///
/// Manages the lifecycle of the bench, including:
/// - Waiting for the database and redis
/// - Initialising the bench when it is missing
/// - Converging sites and applications
/// - Running the selected mode or handing it to the external shell
/// - HTTP API server
/// - Signal handling and graceful shutdown
pub struct ControlService {
    config: ControlConfig,
    cancel: CancellationToken,
}

impl ControlService {
    /// Create a new control service with the given configuration.
    #[must_use]
    pub fn new(config: ControlConfig) -> Self {
        Self {
            config,
            cancel: CancellationToken::new(),
        }
    }

    /// Token that stops [`ControlService::run`] when cancelled.
    #[must_use]
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Request graceful shutdown.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    /// Run the control service.
    ///
    /// This will:
    /// 1. Wait for the database and redis endpoints
    /// 2. Initialise the bench if it does not exist
    /// 3. Reconcile sites and applications with the manifest
    /// 4. Delegate to the external shell, or start the selected mode
    /// 5. Serve the HTTP API until a shutdown signal
    /// 6. Stop the running mode
    pub async fn run(&self) -> ControlResult<()> {
        let (manifest, components) = self.converge().await?;

        if manifest.shell_managed {
            return self.run_delegated(&components, &manifest).await;
        }

        components.lifecycle.start(manifest.mode()).await?;

        let state = api::AppState {
            orchestrator: Arc::clone(&components.orchestrator),
        };
        let app = api::router(state);

        let listen = self.config.server.listen_addr;
        let listener = tokio::net::TcpListener::bind(listen)
            .await
            .map_err(|e| ControlError::Config(format!("failed to bind {listen}: {e}")))?;
        info!(addr = %listen, "control service listening");

        let served = axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal(self.cancel.clone()))
            .await
            .map_err(|e| ControlError::internal(format!("server error: {e}")));

        if let Err(e) = components.lifecycle.shutdown().await {
            error!(error = %e, "failed to stop the running mode");
        }
        served?;

        info!("control service shutdown complete");
        Ok(())
    }

    /// Run one reconciliation pass against the bench and return its report.
    pub async fn reconcile_once(&self) -> ControlResult<ReconcileReport> {
        let manifest = self.load_manifest().await?;
        let (components, runner) = self.components(&manifest);
        self.prepare_bench(&components, runner.as_ref(), &manifest).await?;
        let report = components
            .reconciler
            .reconcile(&manifest.desired_state())
            .await?;
        log_report(&report);
        Ok(report)
    }

    async fn converge(&self) -> ControlResult<(InstanceManifest, Components)> {
        let manifest = self.load_manifest().await?;
        let (components, runner) = self.components(&manifest);
        self.prepare_bench(&components, runner.as_ref(), &manifest).await?;

        let report = components
            .reconciler
            .reconcile(&manifest.desired_state())
            .await?;
        log_report(&report);
        Ok((manifest, components))
    }

    async fn load_manifest(&self) -> ControlResult<InstanceManifest> {
        let manifest = InstanceManifest::load(&self.config.workspace.instance_file).await?;
        info!(
            mode = %manifest.mode(),
            shell_managed = manifest.shell_managed,
            sites = manifest.sites.len(),
            "instance manifest loaded"
        );
        Ok(manifest)
    }

    fn components(&self, manifest: &InstanceManifest) -> (Components, Arc<dyn CommandRunner>) {
        let runner: Arc<dyn CommandRunner> =
            Arc::new(SystemRunner::new(self.config.exec.command_timeout()));
        let components = Components::build(&self.config, manifest, Arc::clone(&runner));
        (components, runner)
    }

    async fn prepare_bench(
        &self,
        components: &Components,
        runner: &dyn CommandRunner,
        manifest: &InstanceManifest,
    ) -> ControlResult<()> {
        self.wait_for_dependencies(&components.workspace).await?;
        ensure_workspace(
            runner,
            &components.workspace,
            &manifest.frappe_branch,
            self.config.workspace.common_site_config.as_deref(),
        )
        .await?;
        Ok(())
    }

    async fn wait_for_dependencies(&self, workspace: &Workspace) -> ControlResult<()> {
        if !self.config.readiness.enabled {
            info!("readiness checks disabled");
            return Ok(());
        }

        let common = self.common_site_config(workspace).await;
        let probes = readiness::startup_probes(&self.config.database, &common);
        readiness::wait_for_all(
            &probes,
            self.config.readiness.timeout(),
            self.config.readiness.poll_interval(),
        )
        .await
    }

    /// Common config of the existing bench, else the one it will be seeded with.
    async fn common_site_config(&self, workspace: &Workspace) -> CommonSiteConfig {
        let candidates = [
            Some(workspace.common_site_config()),
            self.config.workspace.common_site_config.clone(),
        ];
        for path in candidates.into_iter().flatten() {
            match CommonSiteConfig::load(&path).await {
                Ok(common) => return common,
                Err(e) => warn!(path = %path.display(), error = %e, "common site config not usable"),
            }
        }
        CommonSiteConfig::default()
    }

    async fn run_delegated(
        &self,
        components: &Components,
        manifest: &InstanceManifest,
    ) -> ControlResult<()> {
        let mut handle = components
            .lifecycle
            .delegate_to_external_shell(manifest.mode())
            .await?;

        tokio::select! {
            exit = handle.wait() => {
                let exit = exit?;
                info!(status = %exit, "external service script exited");
                if exit.success() {
                    Ok(())
                } else {
                    Err(ControlError::internal(format!("external service script exited with {exit}")))
                }
            }
            () = shutdown_signal(self.cancel.clone()) => {
                handle
                    .terminate(self.config.lifecycle.stop_grace())
                    .await
                    .map_err(ControlError::from)
            }
        }
    }
}

impl std::fmt::Debug for ControlService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ControlService")
            .field("listen_addr", &self.config.server.listen_addr)
            .field("bench_path", &self.config.workspace.bench_path)
            .finish_non_exhaustive()
    }
}

/// Production settings with the manifest's `server_name` taking precedence.
fn production_config(config: &ControlConfig, manifest: &InstanceManifest) -> ProductionConfig {
    let mut production = config.production.clone();
    if let Some(name) = &manifest.server_name {
        production.server_name = Some(name.clone());
    }
    production
}

fn log_report(report: &ReconcileReport) {
    info!(
        created = report.created.len(),
        dropped = report.dropped.len(),
        fetched = report.fetched.len(),
        installed = report.installed.len(),
        uninstalled = report.uninstalled.len(),
        migrated = report.migrated.len(),
        "reconciliation finished"
    );
    for failure in &report.site_failures {
        error!(site = %failure.site, kind = failure.kind, error = %failure.message, "site failed to converge");
    }
    for failure in &report.drop_failures {
        error!(site = %failure.site, kind = failure.kind, error = %failure.message, "site could not be dropped");
    }
}

async fn shutdown_signal(cancel: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "failed to install Ctrl+C handler");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            info!("received Ctrl+C, initiating shutdown");
        }
        () = terminate => {
            info!("received SIGTERM, initiating shutdown");
        }
        () = cancel.cancelled() => {
            info!("shutdown requested");
        }
    }
}
