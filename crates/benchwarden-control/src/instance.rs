//! Desired-state manifest and the bench's common site config.

use std::path::Path;

use serde::Deserialize;

use crate::error::{ControlError, ControlResult};
use crate::lifecycle::DeploymentMode;
use crate::types::{DesiredState, SiteSpec, validate_app_name, validate_site_name};

/// Desired state of a bench as written by the operator.
///
/// ```json
/// {
///   "deployment": "production",
///   "frappe_branch": "version-15",
///   "drop_abandoned_sites": false,
///   "sites": [{ "site_name": "erp.local", "apps": ["erpnext"] }]
/// }
/// ```
#[derive(Debug, Clone, Deserialize)]
pub struct InstanceManifest {
    /// `production` selects production mode; anything else development.
    #[serde(default)]
    pub deployment: String,

    /// Hand the bench to the external service script instead of running it.
    #[serde(default)]
    pub shell_managed: bool,

    /// Branch used for `bench init` and `bench get-app`.
    #[serde(default = "default_frappe_branch")]
    pub frappe_branch: String,

    /// Drop sites that exist but are not listed.
    #[serde(default)]
    pub drop_abandoned_sites: bool,

    /// Hostname patched into the proxy configuration.
    #[serde(default)]
    pub server_name: Option<String>,

    /// Desired sites in declaration order.
    #[serde(default)]
    pub sites: Vec<SiteSpec>,
}

fn default_frappe_branch() -> String {
    "version-15".to_owned()
}

impl InstanceManifest {
    /// Read and parse the manifest file.
    pub async fn load(path: impl AsRef<Path>) -> ControlResult<Self> {
        let path = path.as_ref();
        let contents = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| ControlError::Config(format!("{}: {e}", path.display())))?;
        Self::from_json(&contents)
            .map_err(|e| ControlError::Config(format!("{}: {e}", path.display())))
    }

    /// Parse a manifest from JSON text.
    pub fn from_json(contents: &str) -> ControlResult<Self> {
        let manifest: Self =
            serde_json::from_str(contents).map_err(|e| ControlError::Config(e.to_string()))?;
        manifest.validate()?;
        Ok(manifest)
    }

    fn validate(&self) -> ControlResult<()> {
        let mut seen = std::collections::HashSet::new();
        for site in &self.sites {
            if site.name.trim().is_empty() {
                return Err(ControlError::Config("site with empty name".to_owned()));
            }
            validate_site_name(&site.name)
                .map_err(|e| ControlError::Config(format!("manifest: {e}")))?;
            for app in &site.apps {
                validate_app_name(app).map_err(|e| {
                    ControlError::Config(format!("manifest site {}: {e}", site.name))
                })?;
            }
            if !seen.insert(site.name.as_str()) {
                return Err(ControlError::Config(format!(
                    "site {} listed more than once",
                    site.name
                )));
            }
        }
        Ok(())
    }

    /// Runtime mode selected by `deployment`.
    #[must_use]
    pub fn mode(&self) -> DeploymentMode {
        DeploymentMode::from_selector(&self.deployment)
    }

    /// Sites and drop policy for reconciliation.
    #[must_use]
    pub fn desired_state(&self) -> DesiredState {
        DesiredState::new(self.sites.clone(), self.drop_abandoned_sites)
    }
}

/// The parts of `sites/common_site_config.json` benchwarden reads.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CommonSiteConfig {
    /// Background job queue.
    #[serde(default)]
    pub redis_queue: Option<String>,
    /// Cache.
    #[serde(default)]
    pub redis_cache: Option<String>,
    /// Realtime socket server.
    #[serde(default)]
    pub redis_socketio: Option<String>,
}

impl CommonSiteConfig {
    /// Read and parse the file.
    pub async fn load(path: impl AsRef<Path>) -> ControlResult<Self> {
        let path = path.as_ref();
        let contents = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| ControlError::Config(format!("{}: {e}", path.display())))?;
        serde_json::from_str(&contents)
            .map_err(|e| ControlError::Config(format!("{}: {e}", path.display())))
    }

    /// Configured redis endpoints with their role.
    #[must_use]
    pub fn redis_endpoints(&self) -> Vec<(&'static str, &str)> {
        [
            ("redis_queue", self.redis_queue.as_deref()),
            ("redis_cache", self.redis_cache.as_deref()),
            ("redis_socketio", self.redis_socketio.as_deref()),
        ]
        .into_iter()
        .filter_map(|(role, url)| url.map(|u| (role, u)))
        .collect()
    }
}
