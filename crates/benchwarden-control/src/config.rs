//! Configuration for benchwarden.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use figment::Figment;
use figment::providers::{Env, Format, Toml};
use secrecy::SecretString;
use serde::Deserialize;

use crate::error::{ControlError, ControlResult};

const ENV_PREFIX: &str = "BENCHWARDEN_";

/// Top-level service configuration.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct ControlConfig {
    /// HTTP server configuration.
    #[serde(default)]
    pub server: ServerConfig,

    /// Bench location and layout.
    #[serde(default)]
    pub workspace: WorkspaceConfig,

    /// External command limits.
    #[serde(default)]
    pub exec: ExecConfig,

    /// Database credentials and address.
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Site and application provisioning.
    #[serde(default)]
    pub provisioner: ProvisionerConfig,

    /// Startup dependency checks.
    #[serde(default)]
    pub readiness: ReadinessConfig,

    /// Production mode files and binaries.
    #[serde(default)]
    pub production: ProductionConfig,

    /// Runtime mode transitions.
    #[serde(default)]
    pub lifecycle: LifecycleConfig,

    /// Reconciliation policy.
    #[serde(default)]
    pub reconcile: ReconcileConfig,
}

impl ControlConfig {
    /// Load configuration from the default sources.
    ///
    /// Configuration is loaded in the following order (later sources override earlier):
    /// 1. Default values
    /// 2. `benchwarden.toml` in the current directory (if present)
    /// 3. Environment variables with `BENCHWARDEN_` prefix
    pub fn load() -> ControlResult<Self> {
        Self::from_file("benchwarden.toml")
    }

    /// Load configuration from a specific TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> ControlResult<Self> {
        Self::from_figment(
            Figment::new()
                .merge(Toml::file(path.as_ref()))
                .merge(Env::prefixed(ENV_PREFIX).split("__")),
        )
    }

    /// Extract configuration from an arbitrary figment.
    pub fn from_figment(figment: Figment) -> ControlResult<Self> {
        figment
            .extract()
            .map_err(|e| ControlError::Config(e.to_string()))
    }
}

/// HTTP server configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Address to listen on.
    #[serde(default = "default_listen_addr")]
    pub listen_addr: SocketAddr,
}

const fn default_listen_addr() -> SocketAddr {
    SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 3000)
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
        }
    }
}

/// Bench location and layout.
#[derive(Debug, Clone, Deserialize)]
pub struct WorkspaceConfig {
    /// Bench root directory.
    #[serde(default = "default_bench_path")]
    pub bench_path: PathBuf,

    /// Platform CLI executable.
    #[serde(default = "default_bench_bin")]
    pub bench_bin: String,

    /// Directory names in the sites area that are not sites.
    #[serde(default = "default_ignored_site_dirs")]
    pub ignored_site_dirs: Vec<String>,

    /// Desired-state manifest.
    #[serde(default = "default_instance_file")]
    pub instance_file: PathBuf,

    /// Common site config copied into a freshly initialised bench.
    #[serde(default = "default_common_site_config")]
    pub common_site_config: Option<PathBuf>,
}

fn default_bench_path() -> PathBuf {
    PathBuf::from("/home/frappe/frappe-bench")
}

fn default_bench_bin() -> String {
    "bench".to_owned()
}

fn default_ignored_site_dirs() -> Vec<String> {
    vec!["assets".to_owned()]
}

fn default_instance_file() -> PathBuf {
    PathBuf::from("/config/instance.json")
}

#[allow(clippy::unnecessary_wraps)]
fn default_common_site_config() -> Option<PathBuf> {
    Some(PathBuf::from("/config/common_site_config.json"))
}

impl Default for WorkspaceConfig {
    fn default() -> Self {
        Self {
            bench_path: default_bench_path(),
            bench_bin: default_bench_bin(),
            ignored_site_dirs: default_ignored_site_dirs(),
            instance_file: default_instance_file(),
            common_site_config: default_common_site_config(),
        }
    }
}

/// External command limits.
#[derive(Debug, Clone, Deserialize)]
pub struct ExecConfig {
    /// Limit for mutating commands (fetch, install, site creation) in seconds.
    #[serde(default = "default_command_timeout_secs")]
    pub command_timeout_secs: u64,

    /// Limit for read-only probes in seconds.
    #[serde(default = "default_probe_timeout_secs")]
    pub probe_timeout_secs: u64,
}

const fn default_command_timeout_secs() -> u64 {
    1800
}

const fn default_probe_timeout_secs() -> u64 {
    60
}

impl ExecConfig {
    /// Limit for mutating commands.
    #[must_use]
    pub const fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }

    /// Limit for read-only probes.
    #[must_use]
    pub const fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_secs)
    }
}

impl Default for ExecConfig {
    fn default() -> Self {
        Self {
            command_timeout_secs: default_command_timeout_secs(),
            probe_timeout_secs: default_probe_timeout_secs(),
        }
    }
}

/// Database credentials and address.
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// Database host.
    #[serde(default = "default_database_host")]
    pub host: String,

    /// Database port.
    #[serde(default = "default_database_port")]
    pub port: u16,

    /// Root user used for site creation and removal.
    #[serde(default = "default_root_username")]
    pub root_username: String,

    /// Root password.
    #[serde(default = "default_root_password")]
    pub root_password: SecretString,
}

fn default_database_host() -> String {
    "mariadb".to_owned()
}

const fn default_database_port() -> u16 {
    3306
}

fn default_root_username() -> String {
    "root".to_owned()
}

fn default_root_password() -> SecretString {
    SecretString::from("root".to_owned())
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            host: default_database_host(),
            port: default_database_port(),
            root_username: default_root_username(),
            root_password: default_root_password(),
        }
    }
}

/// Site and application provisioning.
#[derive(Debug, Clone, Deserialize)]
pub struct ProvisionerConfig {
    /// Administrator password of newly created sites.
    #[serde(default = "default_admin_password")]
    pub admin_password: SecretString,

    /// Base URL of the fallback source; the app name is appended.
    #[serde(default = "default_fallback_source_base")]
    pub fallback_source_base: String,
}

fn default_admin_password() -> SecretString {
    SecretString::from("admin".to_owned())
}

fn default_fallback_source_base() -> String {
    "https://github.com/frappe".to_owned()
}

impl Default for ProvisionerConfig {
    fn default() -> Self {
        Self {
            admin_password: default_admin_password(),
            fallback_source_base: default_fallback_source_base(),
        }
    }
}

/// Startup dependency checks.
#[derive(Debug, Clone, Deserialize)]
pub struct ReadinessConfig {
    /// Whether to wait for dependencies at all.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Give up after this many seconds per dependency.
    #[serde(default = "default_readiness_timeout_secs")]
    pub timeout_secs: u64,

    /// Delay between probes in milliseconds.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

const fn default_true() -> bool {
    true
}

const fn default_readiness_timeout_secs() -> u64 {
    120
}

const fn default_poll_interval_ms() -> u64 {
    1000
}

impl ReadinessConfig {
    /// Overall limit per dependency.
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Delay between probes.
    #[must_use]
    pub const fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

impl Default for ReadinessConfig {
    fn default() -> Self {
        Self {
            enabled: default_true(),
            timeout_secs: default_readiness_timeout_secs(),
            poll_interval_ms: default_poll_interval_ms(),
        }
    }
}

/// Production mode files and binaries.
#[derive(Debug, Clone, Deserialize)]
pub struct ProductionConfig {
    /// Where the generated proxy fragment is linked into nginx.
    #[serde(default = "default_nginx_site_conf")]
    pub nginx_site_conf: PathBuf,

    /// Global nginx configuration.
    #[serde(default = "default_nginx_main_conf")]
    pub nginx_main_conf: PathBuf,

    /// Snippet defining the `main` log format, inserted into `http {`.
    #[serde(default = "default_log_format_patch")]
    pub log_format_patch: PathBuf,

    /// Header prepended to the generated supervisor configuration.
    #[serde(default = "default_supervisor_header")]
    pub supervisor_header: PathBuf,

    /// Merged supervisor configuration passed to `supervisord`.
    #[serde(default = "default_merged_supervisor_conf")]
    pub merged_supervisor_conf: PathBuf,

    /// Directory supervisor writes its logs to.
    #[serde(default = "default_supervisor_log_dir")]
    pub supervisor_log_dir: PathBuf,

    /// Supervisor executable.
    #[serde(default = "default_supervisord_bin")]
    pub supervisord_bin: String,

    /// Run the supervisor through `sudo`.
    #[serde(default = "default_true")]
    pub use_sudo: bool,

    /// Hostname patched into the proxy fragment.
    #[serde(default)]
    pub server_name: Option<String>,

    /// Script that takes over when delegating to the external shell.
    #[serde(default = "default_service_script")]
    pub service_script: PathBuf,

    /// Merged supervisor configuration path announced to the service script.
    #[serde(default = "default_shell_merged_supervisor_conf")]
    pub shell_merged_supervisor_conf: PathBuf,
}

fn default_nginx_site_conf() -> PathBuf {
    PathBuf::from("/etc/nginx/conf.d/frappe-bench.conf")
}

fn default_nginx_main_conf() -> PathBuf {
    PathBuf::from("/etc/nginx/nginx.conf")
}

fn default_log_format_patch() -> PathBuf {
    PathBuf::from("/patches/log.patch.conf")
}

fn default_supervisor_header() -> PathBuf {
    PathBuf::from("/patches/head.patch.conf")
}

fn default_merged_supervisor_conf() -> PathBuf {
    PathBuf::from("/tmp/supervisor-merged.tmp")
}

fn default_supervisor_log_dir() -> PathBuf {
    PathBuf::from("/var/log/supervisor")
}

fn default_supervisord_bin() -> String {
    "supervisord".to_owned()
}

fn default_service_script() -> PathBuf {
    PathBuf::from("/scripts/service.sh")
}

fn default_shell_merged_supervisor_conf() -> PathBuf {
    PathBuf::from("/supervisor-merged.conf")
}

impl Default for ProductionConfig {
    fn default() -> Self {
        Self {
            nginx_site_conf: default_nginx_site_conf(),
            nginx_main_conf: default_nginx_main_conf(),
            log_format_patch: default_log_format_patch(),
            supervisor_header: default_supervisor_header(),
            merged_supervisor_conf: default_merged_supervisor_conf(),
            supervisor_log_dir: default_supervisor_log_dir(),
            supervisord_bin: default_supervisord_bin(),
            use_sudo: default_true(),
            server_name: None,
            service_script: default_service_script(),
            shell_merged_supervisor_conf: default_shell_merged_supervisor_conf(),
        }
    }
}

/// Runtime mode transitions.
#[derive(Debug, Clone, Deserialize)]
pub struct LifecycleConfig {
    /// Seconds to wait after SIGTERM before killing.
    #[serde(default = "default_stop_grace_secs")]
    pub stop_grace_secs: u64,
}

const fn default_stop_grace_secs() -> u64 {
    10
}

impl LifecycleConfig {
    /// Grace period after SIGTERM.
    #[must_use]
    pub const fn stop_grace(&self) -> Duration {
        Duration::from_secs(self.stop_grace_secs)
    }
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            stop_grace_secs: default_stop_grace_secs(),
        }
    }
}

/// Reconciliation policy.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ReconcileConfig {
    /// Uninstall applications that are installed but not desired.
    #[serde(default)]
    pub uninstall_extras: bool,

    /// Run `bench migrate` on every desired site after a pass.
    #[serde(default)]
    pub migrate_after: bool,
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use figment::Jail;
    use secrecy::ExposeSecret;

    use super::*;

    #[test]
    fn defaults_match_container_layout() {
        let config = ControlConfig::default();
        assert_eq!(config.server.listen_addr.port(), 3000);
        assert_eq!(
            config.workspace.bench_path,
            PathBuf::from("/home/frappe/frappe-bench")
        );
        assert_eq!(config.database.host, "mariadb");
        assert_eq!(config.database.root_password.expose_secret(), "root");
        assert!(!config.reconcile.uninstall_extras);
        assert!(config.production.server_name.is_none());
    }

    #[test]
    fn file_and_environment_are_layered() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "benchwarden.toml",
                r#"
                [workspace]
                bench_path = "/srv/bench"

                [production]
                server_name = "erp.example.com"

                [exec]
                probe_timeout_secs = 5
                "#,
            )?;
            jail.set_env("BENCHWARDEN_EXEC__PROBE_TIMEOUT_SECS", "7");
            jail.set_env("BENCHWARDEN_DATABASE__ROOT_PASSWORD", "s3cret");

            let config = ControlConfig::load().unwrap();
            assert_eq!(config.workspace.bench_path, PathBuf::from("/srv/bench"));
            assert_eq!(
                config.production.server_name.as_deref(),
                Some("erp.example.com")
            );
            assert_eq!(config.exec.probe_timeout(), Duration::from_secs(7));
            assert_eq!(config.database.root_password.expose_secret(), "s3cret");
            Ok(())
        });
    }

    #[test]
    fn malformed_values_are_config_errors() {
        Jail::expect_with(|jail| {
            jail.set_env("BENCHWARDEN_SERVER__LISTEN_ADDR", "not-an-address");
            let err = ControlConfig::load().unwrap_err();
            assert_eq!(err.kind(), "config");
            Ok(())
        });
    }
}
