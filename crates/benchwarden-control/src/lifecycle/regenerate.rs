//! Proxy and supervisor configuration for production mode.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, LazyLock};

use async_trait::async_trait;
use regex::Regex;
use tracing::{debug, info, warn};

use crate::config::ProductionConfig;
use crate::error::{ControlError, ControlResult};
use crate::exec::CommandRunner;
use crate::workspace::Workspace;

static SERVER_NAME_DIRECTIVE: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"server_name\s+[^;]+;").ok());

const LOG_FORMAT_MARKER: &str = "log_format main";
const HTTP_BLOCK_MARKER: &str = "http {";

/// Produces fresh runtime configuration before the supervisor starts.
#[async_trait]
pub trait ConfigRegenerator: Send + Sync {
    /// Regenerate configuration and return the supervisor file to start with.
    async fn regenerate(&self) -> ControlResult<PathBuf>;
}

/// Regenerates configuration with `bench setup` and links it into place.
pub struct BenchConfigRegenerator {
    workspace: Workspace,
    runner: Arc<dyn CommandRunner>,
    production: ProductionConfig,
}

impl std::fmt::Debug for BenchConfigRegenerator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BenchConfigRegenerator")
            .field("workspace", &self.workspace)
            .field("production", &self.production)
            .finish_non_exhaustive()
    }
}

impl BenchConfigRegenerator {
    /// Create a regenerator.
    #[must_use]
    pub fn new(
        workspace: Workspace,
        runner: Arc<dyn CommandRunner>,
        production: ProductionConfig,
    ) -> Self {
        Self {
            workspace,
            runner,
            production,
        }
    }

    async fn remove_stale(&self) -> ControlResult<()> {
        for path in [
            self.workspace.generated_nginx_conf(),
            self.production.nginx_site_conf.clone(),
            self.workspace.generated_supervisor_conf(),
        ] {
            remove_if_exists(&path)
                .await
                .map_err(|e| ControlError::regenerate("remove stale config", e))?;
        }
        Ok(())
    }

    async fn setup_nginx(&self) -> ControlResult<()> {
        let spec = self.workspace.bench().args(["setup", "nginx", "--yes"]);
        self.runner
            .run(&spec)
            .await
            .map_err(|e| ControlError::from_exec(e, |e| ControlError::regenerate("setup nginx", e)))?;

        if let Err(e) = self.ensure_log_format().await {
            warn!(
                path = %self.production.nginx_main_conf.display(),
                error = %e,
                "could not add log format to nginx config"
            );
        }

        let generated = self.workspace.generated_nginx_conf();
        if let Some(name) = &self.production.server_name {
            let conf = tokio::fs::read_to_string(&generated)
                .await
                .map_err(|e| ControlError::regenerate("read nginx config", e))?;
            tokio::fs::write(&generated, patch_server_name(&conf, name))
                .await
                .map_err(|e| ControlError::regenerate("patch server_name", e))?;
            debug!(server_name = %name, "patched server_name");
        }

        tokio::fs::symlink(&generated, &self.production.nginx_site_conf)
            .await
            .map_err(|e| ControlError::regenerate("link nginx config", e))?;
        Ok(())
    }

    async fn ensure_log_format(&self) -> io::Result<()> {
        let main = tokio::fs::read_to_string(&self.production.nginx_main_conf).await?;
        if main.contains(LOG_FORMAT_MARKER) {
            return Ok(());
        }
        let snippet = tokio::fs::read_to_string(&self.production.log_format_patch).await?;
        match insert_log_format(&main, &snippet) {
            Some(patched) => {
                tokio::fs::write(&self.production.nginx_main_conf, patched).await?;
                info!("added log format to nginx config");
                Ok(())
            }
            None => Err(io::Error::other("no http block found")),
        }
    }

    async fn setup_supervisor(&self) -> ControlResult<PathBuf> {
        tokio::fs::create_dir_all(&self.production.supervisor_log_dir)
            .await
            .map_err(|e| ControlError::regenerate("create supervisor log dir", e))?;

        let spec = self
            .workspace
            .bench()
            .args(["setup", "supervisor", "--skip-redis", "--yes"]);
        self.runner.run(&spec).await.map_err(|e| {
            ControlError::from_exec(e, |e| ControlError::regenerate("setup supervisor", e))
        })?;

        let header = tokio::fs::read_to_string(&self.production.supervisor_header)
            .await
            .map_err(|e| ControlError::regenerate("read supervisor header", e))?;
        let generated = tokio::fs::read_to_string(self.workspace.generated_supervisor_conf())
            .await
            .map_err(|e| ControlError::regenerate("read supervisor config", e))?;

        let merged = &self.production.merged_supervisor_conf;
        tokio::fs::write(merged, merge_supervisor_conf(&header, &generated))
            .await
            .map_err(|e| ControlError::regenerate("write merged supervisor config", e))?;
        Ok(merged.clone())
    }
}

#[async_trait]
impl ConfigRegenerator for BenchConfigRegenerator {
    async fn regenerate(&self) -> ControlResult<PathBuf> {
        info!("regenerating nginx and supervisor config");
        self.remove_stale().await?;
        self.setup_nginx().await?;
        let merged = self.setup_supervisor().await?;
        info!(merged = %merged.display(), "config regenerated");
        Ok(merged)
    }
}

async fn remove_if_exists(path: &Path) -> io::Result<()> {
    match tokio::fs::remove_file(path).await {
        Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
        _ => Ok(()),
    }
}

/// Replace every `server_name ...;` directive with `server_name <name>;`.
#[must_use]
pub fn patch_server_name(conf: &str, name: &str) -> String {
    let replacement = format!("server_name {name};");
    match SERVER_NAME_DIRECTIVE.as_ref() {
        Some(re) => re
            .replace_all(conf, regex::NoExpand(&replacement))
            .into_owned(),
        None => conf.to_owned(),
    }
}

/// Insert `snippet` after the first `http {` line.
///
/// Returns `None` when there is no such line.
#[must_use]
pub fn insert_log_format(main: &str, snippet: &str) -> Option<String> {
    let mut patched = String::with_capacity(main.len() + snippet.len() + 1);
    let mut inserted = false;
    for line in main.split_inclusive('\n') {
        patched.push_str(line);
        if !inserted && line.contains(HTTP_BLOCK_MARKER) {
            if !line.ends_with('\n') {
                patched.push('\n');
            }
            patched.push_str(snippet);
            if !snippet.ends_with('\n') {
                patched.push('\n');
            }
            inserted = true;
        }
    }
    inserted.then_some(patched)
}

/// Header followed by the generated supervisor configuration.
#[must_use]
pub fn merge_supervisor_conf(header: &str, generated: &str) -> String {
    format!("{header}\n{generated}")
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::exec::{ScriptedResponse, ScriptedRunner};

    #[test]
    fn replaces_multiline_server_name_directives() {
        let conf = "server {\n\tlisten 80;\n\tserver_name\n\t\ta.local\n\t\tb.local\n\t\t;\n\tlocation / {}\n}\nserver {\n\tserver_name c.local;\n}\n";
        let patched = patch_server_name(conf, "erp.example.com");
        assert_eq!(patched.matches("server_name erp.example.com;").count(), 2);
        assert!(!patched.contains("a.local"));
        assert!(!patched.contains("c.local"));
        assert!(patched.contains("listen 80;"));
    }

    #[test]
    fn server_name_replacement_is_literal() {
        let patched = patch_server_name("server_name x;", "$1.example.com");
        assert_eq!(patched, "server_name $1.example.com;");
    }

    #[test]
    fn log_format_goes_after_http_line() {
        let main = "user nginx;\nhttp {\n    include mime.types;\n}\n";
        let patched = insert_log_format(main, "log_format main '$remote_addr';").unwrap();
        assert_eq!(
            patched,
            "user nginx;\nhttp {\nlog_format main '$remote_addr';\n    include mime.types;\n}\n"
        );
        assert!(insert_log_format("events {}\n", "x").is_none());
    }

    #[test]
    fn merged_supervisor_conf_starts_with_header() {
        assert_eq!(
            merge_supervisor_conf("[supervisord]\nnodaemon=true", "[program:web]"),
            "[supervisord]\nnodaemon=true\n[program:web]"
        );
    }

    struct Paths {
        _dir: tempfile::TempDir,
        bench: PathBuf,
        production: ProductionConfig,
    }

    fn paths() -> Paths {
        let dir = tempfile::tempdir().unwrap();
        let bench = dir.path().join("bench");
        let etc = dir.path().join("etc");
        let patches = dir.path().join("patches");
        for d in [bench.join("config"), etc.join("conf.d"), patches.clone()] {
            std::fs::create_dir_all(d).unwrap();
        }
        std::fs::write(etc.join("nginx.conf"), "http {\n}\n").unwrap();
        std::fs::write(patches.join("log.patch.conf"), "log_format main '$status';\n").unwrap();
        std::fs::write(patches.join("head.patch.conf"), "[supervisord]\nnodaemon=true").unwrap();

        let production = ProductionConfig {
            nginx_site_conf: etc.join("conf.d/frappe-bench.conf"),
            nginx_main_conf: etc.join("nginx.conf"),
            log_format_patch: patches.join("log.patch.conf"),
            supervisor_header: patches.join("head.patch.conf"),
            merged_supervisor_conf: dir.path().join("supervisor-merged.tmp"),
            supervisor_log_dir: dir.path().join("log/supervisor"),
            server_name: Some("erp.example.com".to_owned()),
            ..ProductionConfig::default()
        };
        Paths {
            _dir: dir,
            bench,
            production,
        }
    }

    fn setup_runner(config_dir: PathBuf) -> ScriptedRunner {
        ScriptedRunner::new(move |spec| {
            match spec.argv().get(1).copied() {
                Some("nginx") => std::fs::write(
                    config_dir.join("nginx.conf"),
                    "server {\n\tserver_name a.local;\n}\n",
                )
                .unwrap(),
                Some("supervisor") => {
                    std::fs::write(config_dir.join("supervisor.conf"), "[program:web]").unwrap();
                }
                _ => {}
            }
            ScriptedResponse::ok()
        })
    }

    #[tokio::test]
    async fn regenerates_links_and_merges() {
        let paths = paths();
        let workspace = Workspace::new(&paths.bench);
        std::fs::write(workspace.generated_supervisor_conf(), "stale").unwrap();

        let runner = Arc::new(setup_runner(workspace.config_dir()));
        let regenerator =
            BenchConfigRegenerator::new(workspace.clone(), runner.clone(), paths.production.clone());

        let merged = regenerator.regenerate().await.unwrap();

        assert_eq!(
            runner.command_lines(),
            [
                "bench setup nginx --yes",
                "bench setup supervisor --skip-redis --yes"
            ]
        );
        assert_eq!(
            std::fs::read_to_string(&merged).unwrap(),
            "[supervisord]\nnodaemon=true\n[program:web]"
        );
        let link = &paths.production.nginx_site_conf;
        assert_eq!(std::fs::read_link(link).unwrap(), workspace.generated_nginx_conf());
        assert!(std::fs::read_to_string(link)
            .unwrap()
            .contains("server_name erp.example.com;"));
        assert!(std::fs::read_to_string(&paths.production.nginx_main_conf)
            .unwrap()
            .contains("log_format main"));
        assert!(paths.production.supervisor_log_dir.is_dir());
    }

    #[tokio::test]
    async fn running_twice_replaces_the_link() {
        let paths = paths();
        let workspace = Workspace::new(&paths.bench);
        let runner = Arc::new(setup_runner(workspace.config_dir()));
        let regenerator = BenchConfigRegenerator::new(workspace, runner, paths.production.clone());

        regenerator.regenerate().await.unwrap();
        regenerator.regenerate().await.unwrap();

        let main = std::fs::read_to_string(&paths.production.nginx_main_conf).unwrap();
        assert_eq!(main.matches("log_format main").count(), 1);
    }

    #[tokio::test]
    async fn failed_setup_names_the_step() {
        let paths = paths();
        let runner = Arc::new(ScriptedRunner::new(|_| ScriptedResponse::fail("no sites")));
        let regenerator =
            BenchConfigRegenerator::new(Workspace::new(&paths.bench), runner, paths.production);

        let err = regenerator.regenerate().await.unwrap_err();
        match err {
            ControlError::RegenerateFailed { step, .. } => assert_eq!(step, "setup nginx"),
            other => panic!("unexpected error: {other}"),
        }
    }
}
