//! Read-only queries against the bench.

use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use super::{Workspace, parse_app_listing};
use crate::error::{ControlError, ControlResult};
use crate::exec::{CommandRunner, CommandSpec};
use crate::types::{AppRecord, ObservedSite, validate_site_name};

/// Queries sites and applications of a bench.
///
/// Nothing is cached: every call reflects the bench as it is now.
#[derive(Clone)]
pub struct WorkspaceInspector {
    workspace: Workspace,
    runner: Arc<dyn CommandRunner>,
    probe_timeout: Duration,
}

impl std::fmt::Debug for WorkspaceInspector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkspaceInspector")
            .field("workspace", &self.workspace)
            .field("probe_timeout", &self.probe_timeout)
            .finish_non_exhaustive()
    }
}

impl WorkspaceInspector {
    /// Create an inspector.
    #[must_use]
    pub fn new(
        workspace: Workspace,
        runner: Arc<dyn CommandRunner>,
        probe_timeout: Duration,
    ) -> Self {
        Self {
            workspace,
            runner,
            probe_timeout,
        }
    }

    /// The inspected workspace.
    #[must_use]
    pub const fn workspace(&self) -> &Workspace {
        &self.workspace
    }

    /// Names of all sites, sorted.
    pub async fn list_sites(&self) -> ControlResult<Vec<String>> {
        let mut sites: Vec<_> = subdirectories(&self.workspace.sites_dir())
            .await?
            .into_iter()
            .filter(|name| !self.workspace.is_ignored_site_dir(name))
            .collect();
        sites.sort();
        Ok(sites)
    }

    /// Whether a site directory exists.
    pub async fn site_exists(&self, site: &str) -> ControlResult<bool> {
        let path = self.workspace.site_dir(site);
        tokio::fs::try_exists(&path)
            .await
            .map_err(|source| ControlError::WorkspaceUnreadable { path, source })
    }

    /// Whether an application checkout directory exists, valid or not.
    pub async fn app_present(&self, app: &str) -> ControlResult<bool> {
        let path = self.workspace.app_dir(app);
        tokio::fs::try_exists(&path)
            .await
            .map_err(|source| ControlError::WorkspaceUnreadable { path, source })
    }

    /// Names of application checkouts that pass `git status`, sorted.
    ///
    /// Directories that fail the probe are skipped.
    pub async fn list_apps(&self) -> ControlResult<Vec<String>> {
        let apps_dir = self.workspace.apps_dir();
        let mut apps = Vec::new();

        for name in subdirectories(&apps_dir).await? {
            let probe = CommandSpec::new("git")
                .arg("-C")
                .arg(apps_dir.join(&name).to_string_lossy())
                .arg("status")
                .capture()
                .timeout(self.probe_timeout);

            match self.runner.run(&probe).await {
                Ok(_) => apps.push(name),
                Err(e) => debug!(app = %name, error = %e, "skipping app directory that is not a checkout"),
            }
        }

        apps.sort();
        Ok(apps)
    }

    /// Applications installed on a site, in listing order.
    pub async fn list_installed_apps(&self, site: &str) -> ControlResult<Vec<AppRecord>> {
        validate_site_name(site)?;
        let spec = self
            .workspace
            .bench_for_site(site)
            .arg("list-apps")
            .capture()
            .timeout(self.probe_timeout);

        let output = self.runner.run(&spec).await.map_err(|e| {
            ControlError::from_exec(e, |source| ControlError::QueryFailed {
                site: site.to_owned(),
                source,
            })
        })?;

        Ok(parse_app_listing(&output.stdout))
    }

    /// A site together with its installed applications.
    pub async fn observe_site(&self, site: &str) -> ControlResult<ObservedSite> {
        Ok(ObservedSite {
            name: site.to_owned(),
            apps: self.list_installed_apps(site).await?,
        })
    }
}

async fn subdirectories(dir: &std::path::Path) -> ControlResult<Vec<String>> {
    let unreadable = |source| ControlError::WorkspaceUnreadable {
        path: dir.to_path_buf(),
        source,
    };

    let mut entries = tokio::fs::read_dir(dir).await.map_err(unreadable)?;
    let mut names = Vec::new();
    while let Some(entry) = entries.next_entry().await.map_err(unreadable)? {
        let is_dir = tokio::fs::metadata(entry.path())
            .await
            .is_ok_and(|meta| meta.is_dir());
        if is_dir {
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
    }
    Ok(names)
}
