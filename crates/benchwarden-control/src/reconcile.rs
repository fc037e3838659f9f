//! Reconciliation of desired sites against the bench.
//!
//! A pass runs the following steps:
//!
//! 1. list the sites in the bench
//! 2. drop undesired sites when the drop policy is on (best effort)
//! 3. for each desired site, in declaration order:
//!    - create it if missing (failure aborts the pass)
//!    - fetch desired applications that are missing from `apps/`
//!    - install the applications the site lacks, in sorted order
//!    - uninstall extra applications when the uninstall policy is on
//! 4. optionally migrate every converged site
//!
//! Failures inside step 3 are isolated per site and collected in the
//! [`ReconcileReport`]; inspection failures abort the pass. Passes are
//! serialised by a pass-level lock.

use serde::Serialize;
use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, info, warn};

use crate::config::ReconcileConfig;
use crate::diff::{AppDiff, sites_to_drop};
use crate::error::{ControlError, ControlResult};
use crate::provisioner::{AppProvisioner, InstallOutcome, UninstallOutcome};
use crate::types::{DesiredState, SiteSpec, is_protected};
use crate::workspace::WorkspaceInspector;

/// Optional steps of a pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcilePolicy {
    /// Uninstall installed applications that are not desired.
    pub uninstall_extras: bool,
    /// Migrate every converged site at the end of the pass.
    pub migrate_after: bool,
}

impl From<&ReconcileConfig> for ReconcilePolicy {
    fn from(config: &ReconcileConfig) -> Self {
        Self {
            uninstall_extras: config.uninstall_extras,
            migrate_after: config.migrate_after,
        }
    }
}

/// An application action on one site.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SiteApp {
    /// Site name.
    pub site: String,
    /// Application name.
    pub app: String,
}

/// A failure confined to one site.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SiteFailure {
    /// Site name.
    pub site: String,
    /// Error kind, see [`ControlError::kind`].
    pub kind: &'static str,
    /// Error message.
    pub message: String,
}

impl SiteFailure {
    fn new(site: &str, error: &ControlError) -> Self {
        Self {
            site: site.to_owned(),
            kind: error.kind(),
            message: error.to_string(),
        }
    }
}

/// What a pass did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileReport {
    /// Sites created.
    pub created: Vec<String>,
    /// Sites dropped.
    pub dropped: Vec<String>,
    /// Applications fetched into the bench.
    pub fetched: Vec<String>,
    /// Applications installed.
    pub installed: Vec<SiteApp>,
    /// Applications uninstalled.
    pub uninstalled: Vec<SiteApp>,
    /// Sites migrated.
    pub migrated: Vec<String>,
    /// Sites whose pass stopped early.
    pub site_failures: Vec<SiteFailure>,
    /// Sites that could not be dropped.
    pub drop_failures: Vec<SiteFailure>,
}

impl ReconcileReport {
    /// Number of mutating actions performed, migrations excluded.
    #[must_use]
    pub fn action_count(&self) -> usize {
        self.created.len()
            + self.dropped.len()
            + self.fetched.len()
            + self.installed.len()
            + self.uninstalled.len()
    }

    /// Whether nothing failed.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.site_failures.is_empty() && self.drop_failures.is_empty()
    }

    fn failed(&self, site: &str) -> bool {
        self.site_failures.iter().any(|f| f.site == site)
    }
}

/// Applies desired state to the bench.
#[derive(Debug)]
pub struct Reconciler {
    inspector: WorkspaceInspector,
    provisioner: AppProvisioner,
    policy: ReconcilePolicy,
    pass_lock: Mutex<()>,
}

impl Reconciler {
    /// Create a reconciler.
    #[must_use]
    pub fn new(
        inspector: WorkspaceInspector,
        provisioner: AppProvisioner,
        policy: ReconcilePolicy,
    ) -> Self {
        Self {
            inspector,
            provisioner,
            policy,
            pass_lock: Mutex::new(()),
        }
    }

    /// The inspector used for observations.
    #[must_use]
    pub const fn inspector(&self) -> &WorkspaceInspector {
        &self.inspector
    }

    /// The provisioner used for mutations.
    #[must_use]
    pub const fn provisioner(&self) -> &AppProvisioner {
        &self.provisioner
    }

    /// Hold the pass lock, excluding passes while other mutations run.
    pub async fn lock(&self) -> MutexGuard<'_, ()> {
        self.pass_lock.lock().await
    }

    /// Run one pass.
    pub async fn reconcile(&self, desired: &DesiredState) -> ControlResult<ReconcileReport> {
        let _pass = self.lock().await;
        info!(
            sites = desired.sites.len(),
            drop_abandoned = desired.drop_abandoned,
            "starting reconciliation pass"
        );

        let observed = self.inspector.list_sites().await?;
        let mut report = ReconcileReport::default();

        if desired.drop_abandoned {
            for site in sites_to_drop(&observed, desired) {
                match self.provisioner.drop_site(&site).await {
                    Ok(()) => report.dropped.push(site),
                    Err(e) => {
                        warn!(site = %site, error = %e, "failed to drop abandoned site");
                        report.drop_failures.push(SiteFailure::new(&site, &e));
                    }
                }
            }
        }

        for spec in &desired.sites {
            if !self.inspector.site_exists(&spec.name).await? {
                self.provisioner.create_site(&spec.name).await?;
                report.created.push(spec.name.clone());
            }

            match self.reconcile_site(spec, &mut report).await {
                Ok(()) => debug!(site = %spec.name, "site converged"),
                Err(
                    e @ (ControlError::QueryFailed { .. } | ControlError::WorkspaceUnreadable { .. }),
                ) => return Err(e),
                Err(e) => {
                    warn!(site = %spec.name, error = %e, "site reconciliation failed");
                    report.site_failures.push(SiteFailure::new(&spec.name, &e));
                }
            }
        }

        if self.policy.migrate_after {
            for spec in &desired.sites {
                if report.failed(&spec.name) {
                    continue;
                }
                match self.provisioner.migrate_site(&spec.name).await {
                    Ok(()) => report.migrated.push(spec.name.clone()),
                    Err(e) => {
                        warn!(site = %spec.name, error = %e, "migration failed");
                        report.site_failures.push(SiteFailure::new(&spec.name, &e));
                    }
                }
            }
        }

        info!(
            actions = report.action_count(),
            site_failures = report.site_failures.len(),
            drop_failures = report.drop_failures.len(),
            "reconciliation pass finished"
        );
        Ok(report)
    }

    async fn reconcile_site(
        &self,
        spec: &SiteSpec,
        report: &mut ReconcileReport,
    ) -> ControlResult<()> {
        let site = spec.name.as_str();

        let mut wanted: Vec<&str> = spec
            .apps
            .iter()
            .map(String::as_str)
            .filter(|app| !is_protected(app))
            .collect();
        wanted.sort_unstable();
        wanted.dedup();

        for app in wanted {
            if !self.inspector.app_present(app).await? {
                self.provisioner
                    .fetch_app(app, self.provisioner.branch())
                    .await?;
                report.fetched.push(app.to_owned());
            }
        }

        let installed = self.inspector.observe_site(site).await?.app_names();
        let diff = AppDiff::compute(&spec.apps, &installed);
        if diff.is_empty() {
            debug!(site = %site, "site already converged");
            return Ok(());
        }

        for app in &diff.to_install {
            if self.provisioner.install_app(site, app).await? != InstallOutcome::Skipped {
                report.installed.push(SiteApp {
                    site: site.to_owned(),
                    app: app.clone(),
                });
            }
        }

        if self.policy.uninstall_extras {
            for app in &diff.to_uninstall {
                if self.provisioner.uninstall_app(site, app).await? != UninstallOutcome::Skipped {
                    report.uninstalled.push(SiteApp {
                        site: site.to_owned(),
                        app: app.clone(),
                    });
                }
            }
        }

        Ok(())
    }
}
