//! Site and application provisioning.
//!
//! Every operation is one or more invocations of the platform CLI. None are
//! transactional: a failure part-way leaves the bench partly converged and
//! the next reconciliation pass picks up from there.

mod strategy;

use std::fmt;
use std::sync::Arc;

use secrecy::{ExposeSecret, SecretString};
use tracing::{debug, info, warn};

use crate::config::{DatabaseConfig, ProvisionerConfig};
use crate::error::{ControlError, ControlResult, ExecError, FetchAttemptError};
use crate::exec::CommandRunner;
use crate::types::{is_protected, validate_app_name, validate_site_name};
use crate::workspace::Workspace;

pub use strategy::{AttemptOutcome, FetchPlan, FetchSource, fallback_url};

/// Credentials used when creating and dropping sites.
#[derive(Clone)]
pub struct SiteCredentials {
    /// Database root user.
    pub root_username: String,
    /// Database root password.
    pub root_password: SecretString,
    /// Administrator password of new sites.
    pub admin_password: SecretString,
}

impl SiteCredentials {
    /// Credentials from configuration.
    #[must_use]
    pub fn from_config(database: &DatabaseConfig, provisioner: &ProvisionerConfig) -> Self {
        Self {
            root_username: database.root_username.clone(),
            root_password: database.root_password.clone(),
            admin_password: provisioner.admin_password.clone(),
        }
    }
}

impl Default for SiteCredentials {
    fn default() -> Self {
        Self::from_config(&DatabaseConfig::default(), &ProvisionerConfig::default())
    }
}

impl fmt::Debug for SiteCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SiteCredentials")
            .field("root_username", &self.root_username)
            .finish_non_exhaustive()
    }
}

/// How an install request was satisfied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstallOutcome {
    /// Installed on the first attempt.
    Installed,
    /// Installed after fetching the application and retrying.
    InstalledAfterFetch,
    /// The request named the protected application and was ignored.
    Skipped,
}

/// How an uninstall request was satisfied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UninstallOutcome {
    /// The application was removed from the site.
    Uninstalled,
    /// The request named the protected application and was ignored.
    Skipped,
}

/// Creates and drops sites and fetches, installs and uninstalls applications.
#[derive(Clone)]
pub struct AppProvisioner {
    workspace: Workspace,
    runner: Arc<dyn CommandRunner>,
    credentials: SiteCredentials,
    branch: String,
    fallback_base: String,
}

impl fmt::Debug for AppProvisioner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AppProvisioner")
            .field("workspace", &self.workspace)
            .field("branch", &self.branch)
            .field("fallback_base", &self.fallback_base)
            .finish_non_exhaustive()
    }
}

impl AppProvisioner {
    /// Create a provisioner with default credentials, branch and fallback source.
    #[must_use]
    pub fn new(workspace: Workspace, runner: Arc<dyn CommandRunner>) -> Self {
        let defaults = ProvisionerConfig::default();
        Self {
            workspace,
            runner,
            credentials: SiteCredentials::default(),
            branch: "version-15".to_owned(),
            fallback_base: defaults.fallback_source_base,
        }
    }

    /// Use these site credentials.
    #[must_use]
    pub fn with_credentials(mut self, credentials: SiteCredentials) -> Self {
        self.credentials = credentials;
        self
    }

    /// Fetch applications from this branch.
    #[must_use]
    pub fn with_branch(mut self, branch: impl Into<String>) -> Self {
        self.branch = branch.into();
        self
    }

    /// Use this fallback source base URL.
    #[must_use]
    pub fn with_fallback_base(mut self, base: impl Into<String>) -> Self {
        self.fallback_base = base.into();
        self
    }

    /// Branch applications are fetched from.
    #[must_use]
    pub fn branch(&self) -> &str {
        &self.branch
    }

    /// Create a site.
    pub async fn create_site(&self, site: &str) -> ControlResult<()> {
        validate_site_name(site)?;
        info!(site = %site, "creating site");
        let spec = self
            .workspace
            .bench()
            .args(["new-site", site, "--db-root-username"])
            .arg(self.credentials.root_username.as_str())
            .arg("--db-root-password")
            .secret_arg(self.credentials.root_password.expose_secret())
            .arg("--admin-password")
            .secret_arg(self.credentials.admin_password.expose_secret());

        self.runner.run(&spec).await.map_err(|e| {
            ControlError::from_exec(e, |source| ControlError::SiteCreateFailed {
                site: site.to_owned(),
                source,
            })
        })?;
        info!(site = %site, "site created");
        Ok(())
    }

    /// Drop a site and its database.
    pub async fn drop_site(&self, site: &str) -> ControlResult<()> {
        validate_site_name(site)?;
        info!(site = %site, "dropping site");
        let spec = self
            .workspace
            .bench()
            .args(["drop-site", site, "--force", "--root-password"])
            .secret_arg(self.credentials.root_password.expose_secret());

        self.runner.run(&spec).await.map_err(|e| {
            ControlError::from_exec(e, |source| ControlError::SiteDropFailed {
                site: site.to_owned(),
                source,
            })
        })?;
        info!(site = %site, "site dropped");
        Ok(())
    }

    /// Run pending migrations on a site.
    pub async fn migrate_site(&self, site: &str) -> ControlResult<()> {
        validate_site_name(site)?;
        info!(site = %site, "migrating site");
        let spec = self.workspace.bench_for_site(site).arg("migrate");
        self.runner.run(&spec).await.map_err(|e| {
            ControlError::from_exec(e, |source| ControlError::MigrateFailed {
                site: site.to_owned(),
                source,
            })
        })?;
        Ok(())
    }

    /// Fetch an application into the bench using the standard plan.
    ///
    /// Between attempts any partial checkout is removed. Returns the source
    /// that succeeded.
    pub async fn fetch_app(&self, app: &str, branch: &str) -> ControlResult<FetchSource> {
        let plan = FetchPlan::standard(app, &self.fallback_base);
        self.fetch_with_plan(app, branch, &plan).await
    }

    /// Fetch an application trying the sources of `plan` in order.
    pub async fn fetch_with_plan(
        &self,
        app: &str,
        branch: &str,
        plan: &FetchPlan,
    ) -> ControlResult<FetchSource> {
        validate_app_name(app)?;
        let mut attempts = Vec::new();

        for (index, source) in plan.sources().iter().enumerate() {
            if index > 0 {
                self.remove_partial_checkout(app).await?;
            }

            match self.try_fetch(app, branch, source).await {
                AttemptOutcome::Fetched => {
                    info!(app = %app, source = %source, "app fetched");
                    return Ok(source.clone());
                }
                AttemptOutcome::Failed(error) if error.is_timeout() => {
                    self.discard_partial_checkout(app).await;
                    return Err(ControlError::from(error));
                }
                AttemptOutcome::Failed(error) => {
                    warn!(app = %app, source = %source, error = %error, "fetch attempt failed");
                    attempts.push(FetchAttemptError {
                        locator: source.locator(app).to_owned(),
                        error,
                    });
                }
            }
        }

        self.discard_partial_checkout(app).await;
        Err(ControlError::FetchFailed {
            app: app.to_owned(),
            attempts,
        })
    }

    async fn try_fetch(
        &self,
        app: &str,
        branch: &str,
        source: &FetchSource,
    ) -> AttemptOutcome<ExecError> {
        let spec = self
            .workspace
            .bench()
            .args(["get-app", "--branch", branch, source.locator(app)]);

        match self.runner.run(&spec).await {
            Ok(_) => AttemptOutcome::Fetched,
            Err(e) => AttemptOutcome::Failed(e),
        }
    }

    async fn remove_partial_checkout(&self, app: &str) -> ControlResult<()> {
        let path = self.workspace.app_dir(app);
        if path.parent() != Some(self.workspace.apps_dir().as_path())
            || path.file_name().and_then(|n| n.to_str()) != Some(app)
        {
            return Err(ControlError::InvalidAppName(app.to_owned()));
        }
        match tokio::fs::remove_dir_all(&path).await {
            Ok(()) => {
                debug!(app = %app, path = %path.display(), "removed partial checkout");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(ControlError::CleanupFailed {
                app: app.to_owned(),
                path,
                source,
            }),
        }
    }

    async fn discard_partial_checkout(&self, app: &str) {
        if let Err(e) = self.remove_partial_checkout(app).await {
            warn!(app = %app, error = %e, "leaving partial checkout behind");
        }
    }

    /// Install an application on a site.
    ///
    /// A failed install is followed by a fetch and exactly one retry.
    pub async fn install_app(&self, site: &str, app: &str) -> ControlResult<InstallOutcome> {
        validate_site_name(site)?;
        validate_app_name(app)?;
        if is_protected(app) {
            debug!(site = %site, app = %app, "ignoring install of protected app");
            return Ok(InstallOutcome::Skipped);
        }

        let install_failed = |source: crate::error::BoxError| ControlError::InstallFailed {
            site: site.to_owned(),
            app: app.to_owned(),
            source,
        };

        match self.run_install(site, app).await {
            Ok(()) => {
                info!(site = %site, app = %app, "app installed");
                return Ok(InstallOutcome::Installed);
            }
            Err(e) if e.is_timeout() => return Err(ControlError::from(e)),
            Err(e) => {
                warn!(site = %site, app = %app, error = %e, "install failed, fetching app and retrying");
            }
        }

        let branch = self.branch.clone();
        self.fetch_app(app, &branch).await.map_err(|e| match e {
            timeout @ ControlError::Timeout { .. } => timeout,
            other => install_failed(Box::new(other)),
        })?;

        self.run_install(site, app)
            .await
            .map_err(|e| ControlError::from_exec(e, |source| install_failed(Box::new(source))))?;

        info!(site = %site, app = %app, "app installed after fetch");
        Ok(InstallOutcome::InstalledAfterFetch)
    }

    async fn run_install(&self, site: &str, app: &str) -> Result<(), ExecError> {
        let spec = self
            .workspace
            .bench_for_site(site)
            .args(["install-app", app]);
        self.runner.run(&spec).await.map(|_| ())
    }

    /// Uninstall an application from a site. Single attempt.
    pub async fn uninstall_app(&self, site: &str, app: &str) -> ControlResult<UninstallOutcome> {
        validate_site_name(site)?;
        validate_app_name(app)?;
        if is_protected(app) {
            debug!(site = %site, app = %app, "ignoring uninstall of protected app");
            return Ok(UninstallOutcome::Skipped);
        }

        let spec = self
            .workspace
            .bench_for_site(site)
            .args(["uninstall-app", app, "--yes"]);

        self.runner.run(&spec).await.map_err(|e| {
            ControlError::from_exec(e, |source| ControlError::UninstallFailed {
                site: site.to_owned(),
                app: app.to_owned(),
                source,
            })
        })?;
        info!(site = %site, app = %app, "app uninstalled");
        Ok(UninstallOutcome::Uninstalled)
    }
}
