//! Common test utilities for benchwarden integration tests.
#![allow(clippy::unwrap_used, dead_code)]

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use benchwarden_control::config::ProductionConfig;
use benchwarden_control::exec::{CommandSpec, ScriptedResponse, ScriptedRunner};
use benchwarden_control::lifecycle::BenchConfigRegenerator;
use benchwarden_control::reconcile::ReconcilePolicy;
use benchwarden_control::{
    AppProvisioner, BenchOrchestrator, LifecycleManager, Reconciler, Workspace,
    WorkspaceInspector,
};
use tempfile::TempDir;

/// What the simulated bench knows beyond the directory tree.
#[derive(Debug, Default)]
pub struct BenchModel {
    /// Installed applications per site, excluding the base app.
    pub installed: BTreeMap<String, Vec<String>>,
    /// Apps `bench get-app <name>` can fetch.
    pub registry: BTreeSet<String>,
    /// Apps `bench get-app <url>` can fetch.
    pub repositories: BTreeSet<String>,
    /// Sites whose `new-site` fails.
    pub failing_creates: BTreeSet<String>,
    /// Sites whose `drop-site` fails.
    pub failing_drops: BTreeSet<String>,
    /// Sites whose `list-apps` fails.
    pub failing_queries: BTreeSet<String>,
    /// Apps whose install fails on every site.
    pub failing_installs: BTreeSet<String>,
}

/// A bench directory in a tempdir driven by a [`ScriptedRunner`] that acts
/// like the platform CLI.
pub struct FakeBench {
    pub dir: TempDir,
    pub workspace: Workspace,
    pub model: Arc<Mutex<BenchModel>>,
    pub runner: Arc<ScriptedRunner>,
}

impl FakeBench {
    /// An initialised bench with the base app checked out and no sites.
    pub fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("frappe-bench");
        std::fs::create_dir_all(root.join("sites/assets")).unwrap();
        std::fs::create_dir_all(root.join("apps/frappe/.git")).unwrap();
        std::fs::write(root.join("sites/common_site_config.json"), "{}").unwrap();
        std::fs::create_dir_all(root.join("config")).unwrap();

        let etc = dir.path().join("etc");
        std::fs::create_dir_all(etc.join("nginx/conf.d")).unwrap();
        std::fs::write(etc.join("nginx/nginx.conf"), "events {}\nhttp {\n    include conf.d/*.conf;\n}\n").unwrap();
        std::fs::write(etc.join("log.patch.conf"), "    log_format main '$remote_addr $request';\n").unwrap();
        std::fs::write(etc.join("head.patch.conf"), "[supervisord]\nnodaemon=true").unwrap();

        let model = Arc::new(Mutex::new(BenchModel::default()));
        let runner = {
            let model = Arc::clone(&model);
            let root = root.clone();
            Arc::new(ScriptedRunner::new(move |spec| {
                respond(&root, &mut model.lock().unwrap(), spec)
            }))
        };

        Self {
            dir,
            workspace: Workspace::new(root),
            model,
            runner,
        }
    }

    /// Make `apps` fetchable by name.
    pub fn with_registry_apps(self, apps: &[&str]) -> Self {
        self.model
            .lock()
            .unwrap()
            .registry
            .extend(apps.iter().map(|a| (*a).to_owned()));
        self
    }

    /// Make `apps` fetchable only from their repository URL.
    pub fn with_repository_apps(self, apps: &[&str]) -> Self {
        self.model
            .lock()
            .unwrap()
            .repositories
            .extend(apps.iter().map(|a| (*a).to_owned()));
        self
    }

    /// Create a site directly, bypassing the CLI.
    pub fn with_site(self, site: &str, apps: &[&str]) -> Self {
        std::fs::create_dir_all(self.workspace.site_dir(site)).unwrap();
        self.model.lock().unwrap().installed.insert(
            site.to_owned(),
            apps.iter().map(|a| (*a).to_owned()).collect(),
        );
        self
    }

    /// Check an app out directly, bypassing the CLI.
    pub fn with_checkout(self, app: &str) -> Self {
        std::fs::create_dir_all(self.workspace.app_dir(app).join(".git")).unwrap();
        self
    }

    /// Mutate the model.
    pub fn configure(&self, f: impl FnOnce(&mut BenchModel)) {
        f(&mut self.model.lock().unwrap());
    }

    /// Installed apps of `site`, sorted.
    pub fn installed(&self, site: &str) -> Vec<String> {
        let mut apps = self
            .model
            .lock()
            .unwrap()
            .installed
            .get(site)
            .cloned()
            .unwrap_or_default();
        apps.sort();
        apps
    }

    /// Whether a site directory exists.
    pub fn has_site(&self, site: &str) -> bool {
        self.workspace.site_dir(site).is_dir()
    }

    /// Whether an app checkout with a `.git` directory exists.
    pub fn has_checkout(&self, app: &str) -> bool {
        self.workspace.app_dir(app).join(".git").is_dir()
    }

    /// Whether anything exists at the app's checkout path.
    pub fn has_app_dir(&self, app: &str) -> bool {
        self.workspace.app_dir(app).exists()
    }

    /// Masked bench command lines, without the program name.
    pub fn bench_calls(&self) -> Vec<String> {
        self.runner
            .lines_starting_with("bench ")
            .into_iter()
            .map(|l| l.trim_start_matches("bench ").to_owned())
            .collect()
    }

    /// Bench calls that mutate the bench.
    pub fn mutating_calls(&self) -> Vec<String> {
        self.bench_calls()
            .into_iter()
            .filter(|l| !l.ends_with("list-apps"))
            .collect()
    }

    pub fn inspector(&self) -> WorkspaceInspector {
        WorkspaceInspector::new(
            self.workspace.clone(),
            self.runner.clone(),
            Duration::from_secs(5),
        )
    }

    pub fn provisioner(&self) -> AppProvisioner {
        AppProvisioner::new(self.workspace.clone(), self.runner.clone())
    }

    pub fn reconciler(&self, policy: ReconcilePolicy) -> Reconciler {
        Reconciler::new(self.inspector(), self.provisioner(), policy)
    }

    /// Production settings pointing into the tempdir.
    pub fn production_config(&self) -> ProductionConfig {
        let etc = self.dir.path().join("etc");
        ProductionConfig {
            nginx_site_conf: etc.join("nginx/conf.d/frappe-bench.conf"),
            nginx_main_conf: etc.join("nginx/nginx.conf"),
            log_format_patch: etc.join("log.patch.conf"),
            supervisor_header: etc.join("head.patch.conf"),
            merged_supervisor_conf: self.dir.path().join("supervisor-merged.conf"),
            supervisor_log_dir: self.dir.path().join("log/supervisor"),
            use_sudo: false,
            ..ProductionConfig::default()
        }
    }

    pub fn lifecycle(&self) -> LifecycleManager {
        let production = self.production_config();
        let regenerator = Arc::new(BenchConfigRegenerator::new(
            self.workspace.clone(),
            self.runner.clone(),
            production.clone(),
        ));
        LifecycleManager::new(
            self.workspace.clone(),
            self.runner.clone(),
            regenerator,
            production,
            Duration::from_millis(50),
        )
    }

    pub fn orchestrator(&self) -> (Arc<BenchOrchestrator>, Arc<LifecycleManager>) {
        let lifecycle = Arc::new(self.lifecycle());
        let reconciler = Arc::new(self.reconciler(ReconcilePolicy::default()));
        (
            Arc::new(BenchOrchestrator::new(reconciler, Arc::clone(&lifecycle))),
            lifecycle,
        )
    }
}

fn respond(root: &Path, model: &mut BenchModel, spec: &CommandSpec) -> ScriptedResponse {
    let argv = spec.argv();
    match spec.program() {
        "git" => match argv.as_slice() {
            ["-C", dir, "status"] if Path::new(dir).join(".git").is_dir() => {
                ScriptedResponse::stdout("On branch version-15\n")
            }
            _ => ScriptedResponse::Failure {
                code: 128,
                stderr: "fatal: not a git repository".to_owned(),
            },
        },
        "bench" => respond_bench(root, model, &argv),
        _ => ScriptedResponse::ok(),
    }
}

fn respond_bench(root: &Path, model: &mut BenchModel, argv: &[&str]) -> ScriptedResponse {
    let site_dir = |site: &str| root.join("sites").join(site);
    let app_dir = |app: &str| root.join("apps").join(app);

    match argv {
        ["new-site", site, ..] => {
            if model.failing_creates.contains(*site) {
                return ScriptedResponse::fail(format!("Database for {site} could not be created"));
            }
            std::fs::create_dir_all(site_dir(*site)).unwrap();
            model.installed.insert((*site).to_owned(), Vec::new());
            ScriptedResponse::ok()
        }
        ["drop-site", site, ..] => {
            if model.failing_drops.contains(*site) {
                return ScriptedResponse::fail(format!("Access denied dropping {site}"));
            }
            let _ = std::fs::remove_dir_all(site_dir(*site));
            model.installed.remove(*site);
            ScriptedResponse::ok()
        }
        ["get-app", "--branch", _, locator] => {
            let (name, known) = match locator.rsplit_once('/') {
                Some((_, name)) => (name, model.repositories.contains(name)),
                None => (*locator, model.registry.contains(*locator)),
            };
            if known {
                std::fs::create_dir_all(app_dir(name).join(".git")).unwrap();
                ScriptedResponse::ok()
            } else {
                std::fs::create_dir_all(app_dir(name)).unwrap();
                std::fs::write(app_dir(name).join("partial"), "").unwrap();
                ScriptedResponse::fail(format!("could not find {locator}"))
            }
        }
        ["--site", site, "list-apps"] => {
            if model.failing_queries.contains(*site) {
                return ScriptedResponse::fail("OperationalError: Access denied");
            }
            let mut out = String::from("frappe 15.38.0 (a1b2c3d) [version-15]\n");
            for app in model.installed.get(*site).into_iter().flatten() {
                out.push_str(&format!("{app} 1.0.0 (deadbee) [version-15]\n"));
            }
            ScriptedResponse::stdout(out)
        }
        ["--site", site, "install-app", app] => {
            if !app_dir(*app).join(".git").is_dir() || model.failing_installs.contains(*app) {
                return ScriptedResponse::fail(format!("App {app} not installed"));
            }
            let apps = model.installed.entry((*site).to_owned()).or_default();
            if !apps.iter().any(|a| a == app) {
                apps.push((*app).to_owned());
            }
            ScriptedResponse::ok()
        }
        ["setup", "nginx", ..] => {
            std::fs::write(
                root.join("config/nginx.conf"),
                "server {\n    listen 80;\n    server_name localhost;\n}\n",
            )
            .unwrap();
            ScriptedResponse::ok()
        }
        ["setup", "supervisor", ..] => {
            std::fs::write(
                root.join("config/supervisor.conf"),
                "[program:frappe-bench-web]\ncommand=gunicorn\n",
            )
            .unwrap();
            ScriptedResponse::ok()
        }
        ["--site", site, "uninstall-app", app, "--yes"] => {
            if let Some(apps) = model.installed.get_mut(*site) {
                apps.retain(|a| a != app);
            }
            ScriptedResponse::ok()
        }
        _ => ScriptedResponse::ok(),
    }
}

