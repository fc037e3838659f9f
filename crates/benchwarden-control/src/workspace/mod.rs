//! The bench directory and read-only inspection of it.
//!
//! A bench is laid out as:
//!
//! ```text
//! <root>/
//! ├── apps/<app>/              version-controlled application checkouts
//! ├── sites/<site>/            one directory per site
//! ├── sites/common_site_config.json
//! └── config/                  generated nginx.conf and supervisor.conf
//! ```

mod bootstrap;
mod inspector;
mod parse;

use std::path::{Path, PathBuf};

use crate::config::WorkspaceConfig;
use crate::exec::CommandSpec;

pub use bootstrap::{BootstrapOutcome, ensure_workspace};
pub use inspector::WorkspaceInspector;
pub use parse::{parse_app_line, parse_app_listing};

/// Paths and CLI entry point of one bench.
#[derive(Debug, Clone)]
pub struct Workspace {
    root: PathBuf,
    bench_bin: String,
    ignored_site_dirs: Vec<String>,
}

impl Workspace {
    /// Create a workspace rooted at `root` using the `bench` executable on `PATH`.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            bench_bin: "bench".to_owned(),
            ignored_site_dirs: vec!["assets".to_owned()],
        }
    }

    /// Create a workspace from configuration.
    #[must_use]
    pub fn from_config(config: &WorkspaceConfig) -> Self {
        Self {
            root: config.bench_path.clone(),
            bench_bin: config.bench_bin.clone(),
            ignored_site_dirs: config.ignored_site_dirs.clone(),
        }
    }

    /// Use a different platform CLI executable.
    #[must_use]
    pub fn with_bench_bin(mut self, bin: impl Into<String>) -> Self {
        self.bench_bin = bin.into();
        self
    }

    /// Bench root directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory holding one subdirectory per site.
    #[must_use]
    pub fn sites_dir(&self) -> PathBuf {
        self.root.join("sites")
    }

    /// Directory holding application checkouts.
    #[must_use]
    pub fn apps_dir(&self) -> PathBuf {
        self.root.join("apps")
    }

    /// Directory holding generated runtime configuration.
    #[must_use]
    pub fn config_dir(&self) -> PathBuf {
        self.root.join("config")
    }

    /// Directory of one site.
    #[must_use]
    pub fn site_dir(&self, site: &str) -> PathBuf {
        self.sites_dir().join(site)
    }

    /// Checkout directory of one application.
    #[must_use]
    pub fn app_dir(&self, app: &str) -> PathBuf {
        self.apps_dir().join(app)
    }

    /// Shared configuration file of all sites.
    #[must_use]
    pub fn common_site_config(&self) -> PathBuf {
        self.sites_dir().join("common_site_config.json")
    }

    /// Proxy configuration written by `bench setup nginx`.
    #[must_use]
    pub fn generated_nginx_conf(&self) -> PathBuf {
        self.config_dir().join("nginx.conf")
    }

    /// Supervisor configuration written by `bench setup supervisor`.
    #[must_use]
    pub fn generated_supervisor_conf(&self) -> PathBuf {
        self.config_dir().join("supervisor.conf")
    }

    /// Whether a directory name in the sites area is not a site.
    #[must_use]
    pub fn is_ignored_site_dir(&self, name: &str) -> bool {
        self.ignored_site_dirs.iter().any(|d| d == name)
    }

    /// Platform CLI invocation in the bench root.
    #[must_use]
    pub fn bench(&self) -> CommandSpec {
        CommandSpec::new(self.bench_bin.as_str()).current_dir(&self.root)
    }

    /// Platform CLI invocation scoped to one site.
    #[must_use]
    pub fn bench_for_site(&self, site: &str) -> CommandSpec {
        self.bench().args(["--site", site])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derives_layout_from_root() {
        let ws = Workspace::new("/home/frappe/frappe-bench");
        assert_eq!(
            ws.site_dir("a.local"),
            PathBuf::from("/home/frappe/frappe-bench/sites/a.local")
        );
        assert_eq!(
            ws.app_dir("crm"),
            PathBuf::from("/home/frappe/frappe-bench/apps/crm")
        );
        assert_eq!(
            ws.generated_supervisor_conf(),
            PathBuf::from("/home/frappe/frappe-bench/config/supervisor.conf")
        );
    }

    #[test]
    fn site_commands_run_in_bench_root() {
        let ws = Workspace::new("/bench");
        let spec = ws.bench_for_site("a.local").arg("list-apps");
        assert_eq!(spec.display(), "bench --site a.local list-apps");
        assert_eq!(spec.cwd(), Some(Path::new("/bench")));
    }

    #[test]
    fn assets_directory_is_not_a_site() {
        let ws = Workspace::new("/bench");
        assert!(ws.is_ignored_site_dir("assets"));
        assert!(!ws.is_ignored_site_dir("a.local"));
    }
}
