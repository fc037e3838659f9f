//! Benchwarden service binary.
//!
//! Converges a Frappe bench on its instance manifest, runs it and serves the
//! control API.

use std::path::PathBuf;

use benchwarden_control::{ControlConfig, ControlService, InstanceManifest};
use clap::{Parser, Subcommand};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

/// Frappe bench manager.
#[derive(Parser, Debug)]
#[command(name = "benchwarden")]
#[command(about = "Keep a Frappe bench converged on its instance manifest")]
#[command(version)]
struct Cli {
    /// Path to configuration file.
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Enable verbose logging.
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone, Copy)]
enum Command {
    /// Reconcile, run the bench and serve the API (default).
    Run,
    /// Run a single reconciliation pass and exit.
    Reconcile,
    /// Validate the configuration and instance manifest.
    CheckConfig,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        "debug,hyper=info,tower=info,sqlx=warn"
    } else {
        "info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .init();

    let config = match &cli.config {
        Some(path) => ControlConfig::from_file(path)?,
        None => ControlConfig::load()?,
    };

    info!(
        bench_path = %config.workspace.bench_path.display(),
        instance_file = %config.workspace.instance_file.display(),
        listen_addr = %config.server.listen_addr,
        "configuration loaded"
    );

    match cli.command.unwrap_or(Command::Run) {
        Command::Run => {
            let service = ControlService::new(config);
            if let Err(e) = service.run().await {
                error!(error = %e, kind = e.kind(), "benchwarden stopped with an error");
                return Err(e.into());
            }
        }
        Command::Reconcile => {
            let report = ControlService::new(config).reconcile_once().await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
            if !report.is_clean() {
                anyhow::bail!(
                    "{} site(s) failed to converge",
                    report.site_failures.len() + report.drop_failures.len()
                );
            }
        }
        Command::CheckConfig => {
            let manifest = InstanceManifest::load(&config.workspace.instance_file).await?;
            info!(
                mode = %manifest.mode(),
                shell_managed = manifest.shell_managed,
                frappe_branch = %manifest.frappe_branch,
                sites = manifest.sites.len(),
                "instance manifest is valid"
            );
        }
    }

    Ok(())
}
