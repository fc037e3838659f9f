//! Operations offered to the control surface.

use std::sync::Arc;

use serde::Serialize;
use tracing::{info, warn};

use crate::error::{ControlError, ControlResult};
use crate::lifecycle::{DeploymentStatus, LifecycleManager};
use crate::reconcile::{ReconcileReport, Reconciler};
use crate::types::{AppRecord, DesiredState, validate_app_name, validate_site_name};

/// Result of creating a site through the control surface.
#[derive(Debug, Clone, Serialize)]
pub struct SiteCreation {
    /// Site name.
    pub site: String,
    /// Applications requested for the site.
    pub apps: Vec<String>,
    /// Whether the running mode was restarted.
    pub restarted: bool,
    /// Why the restart did not happen, if it did not.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub restart_error: Option<String>,
}

/// Coordinates inspection, provisioning and the lifecycle for callers.
///
/// Mutations hold the reconciler's pass lock, so they never interleave with a
/// reconciliation pass.
#[derive(Debug, Clone)]
pub struct BenchOrchestrator {
    reconciler: Arc<Reconciler>,
    lifecycle: Arc<LifecycleManager>,
}

impl BenchOrchestrator {
    /// Create an orchestrator.
    #[must_use]
    pub const fn new(reconciler: Arc<Reconciler>, lifecycle: Arc<LifecycleManager>) -> Self {
        Self {
            reconciler,
            lifecycle,
        }
    }

    /// The lifecycle manager.
    #[must_use]
    pub fn lifecycle(&self) -> &LifecycleManager {
        &self.lifecycle
    }

    /// Names of all sites.
    pub async fn list_sites(&self) -> ControlResult<Vec<String>> {
        self.reconciler.inspector().list_sites().await
    }

    /// Names of all valid application checkouts in the bench.
    pub async fn list_workspace_apps(&self) -> ControlResult<Vec<String>> {
        self.reconciler.inspector().list_apps().await
    }

    /// Applications installed on a site.
    pub async fn list_installed_apps(&self, site: &str) -> ControlResult<Vec<AppRecord>> {
        validate_site_name(site)?;
        let inspector = self.reconciler.inspector();
        if !inspector.site_exists(site).await? {
            return Err(ControlError::SiteNotFound(site.to_owned()));
        }
        inspector.list_installed_apps(site).await
    }

    /// Create a site, install applications on it and restart the running mode.
    ///
    /// A failed restart is reported in the result; the site stays created.
    pub async fn create_site_with_apps(
        &self,
        site: &str,
        apps: &[String],
    ) -> ControlResult<SiteCreation> {
        validate_site_name(site)?;
        for app in apps {
            validate_app_name(app)?;
        }

        {
            let _pass = self.reconciler.lock().await;
            let inspector = self.reconciler.inspector();
            if inspector.site_exists(site).await? {
                return Err(ControlError::SiteAlreadyExists(site.to_owned()));
            }

            let provisioner = self.reconciler.provisioner();
            provisioner.create_site(site).await?;
            for app in apps {
                provisioner.install_app(site, app).await?;
            }
        }

        let (restarted, restart_error) = match self.lifecycle.restart().await {
            Ok(()) => (true, None),
            Err(e) => {
                warn!(site = %site, error = %e, "site created but restart failed");
                (false, Some(e.to_string()))
            }
        };

        info!(site = %site, apps = apps.len(), restarted, "site created via control surface");
        Ok(SiteCreation {
            site: site.to_owned(),
            apps: apps.to_vec(),
            restarted,
            restart_error,
        })
    }

    /// Run a reconciliation pass.
    pub async fn reconcile(&self, desired: &DesiredState) -> ControlResult<ReconcileReport> {
        self.reconciler.reconcile(desired).await
    }

    /// Restart the running mode.
    pub async fn restart(&self) -> ControlResult<()> {
        self.lifecycle.restart().await
    }

    /// Current lifecycle snapshot.
    #[must_use]
    pub fn status(&self) -> DeploymentStatus {
        self.lifecycle.status()
    }
}
