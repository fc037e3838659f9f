//! Benchwarden control layer
//!
//! This crate keeps a Frappe bench converged on a declared set of sites and
//! applications and owns the process that serves it.
//!
//! # Architecture
//!
//! - **Command execution**: every bench, git and supervisor invocation goes
//!   through a [`CommandRunner`] with a time limit and masked secrets
//! - **Inspection**: [`WorkspaceInspector`] reads sites, application checkouts
//!   and installed applications without changing anything
//! - **Provisioning**: [`AppProvisioner`] creates and drops sites and fetches,
//!   installs and uninstalls applications
//! - **Reconciliation**: [`Reconciler`] drives the bench towards a
//!   [`DesiredState`], one pass at a time
//! - **Lifecycle**: [`LifecycleManager`] runs development or production mode,
//!   or hands the bench to an external shell script
//! - **API surface**: HTTP endpoints for site listing, creation and restarts
//!
//! # Lifecycle
//!
//! ```text
//! RunningDevelopment ◀── Stopped ──▶ RunningProduction
//!                           │
//!                           ▼
//!                       Unmanaged
//! ```
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! use benchwarden_control::{
//!     AppProvisioner, Reconciler, SystemRunner, Workspace, WorkspaceInspector,
//!     reconcile::ReconcilePolicy,
//!     types::{DesiredState, SiteSpec},
//! };
//!
//! let runner = Arc::new(SystemRunner::new(Duration::from_secs(1800)));
//! let workspace = Workspace::new("/home/frappe/frappe-bench");
//! let reconciler = Reconciler::new(
//!     WorkspaceInspector::new(workspace.clone(), runner.clone(), Duration::from_secs(60)),
//!     AppProvisioner::new(workspace, runner),
//!     ReconcilePolicy::default(),
//! );
//!
//! let desired = DesiredState::new(vec![SiteSpec::new("erp.local", ["erpnext"])], false);
//! let report = reconciler.reconcile(&desired).await?;
//! ```

#![doc = include_str!("../README.md")]
#![forbid(unsafe_code)]

pub mod api;
pub mod config;
pub mod diff;
pub mod error;
pub mod exec;
pub mod instance;
pub mod lifecycle;
pub mod orchestrator;
pub mod provisioner;
pub mod readiness;
pub mod reconcile;
pub mod service;
pub mod types;
pub mod workspace;

// Re-export commonly used types at the crate root
pub use config::ControlConfig;
pub use error::{ControlError, ControlResult, ExecError};
pub use exec::{CommandRunner, CommandSpec, ProcessHandle, SystemRunner};
pub use instance::InstanceManifest;
pub use lifecycle::{DeploymentMode, DeploymentStatus, LifecycleManager, StateKind};
pub use orchestrator::BenchOrchestrator;
pub use provisioner::AppProvisioner;
pub use reconcile::{ReconcileReport, Reconciler};
pub use service::ControlService;
pub use types::{AppRecord, DesiredState, SiteSpec};
pub use workspace::{Workspace, WorkspaceInspector};
