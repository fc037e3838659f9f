//! Site and lifecycle endpoints.

use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::ControlError;
use crate::lifecycle::DeploymentStatus;
use crate::types::AppRecord;

use super::AppState;

/// Request to create a site.
#[derive(Debug, Default, Deserialize)]
pub struct CreateSiteRequest {
    /// Applications to install after creation.
    #[serde(default)]
    pub apps: Vec<String>,
}

/// A site with its installed applications.
#[derive(Debug, Serialize)]
pub struct SiteResponse {
    /// Site name.
    pub site: String,
    /// Installed applications in listing order.
    pub apps: Vec<AppRecord>,
    /// Address the site is served under.
    pub url: String,
}

/// Response for creating a site.
#[derive(Debug, Serialize)]
pub struct SiteCreatedResponse {
    /// Site name.
    pub site: String,
    /// Applications installed.
    pub apps: Vec<String>,
    /// Address the site is served under.
    pub url: String,
    /// Whether the running mode was restarted.
    pub restarted: bool,
    /// Restart failure, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub restart_error: Option<String>,
}

/// Error response.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    /// Error message.
    pub error: String,
    /// Stable error kind.
    pub kind: &'static str,
}

type ApiError = (StatusCode, Json<ErrorResponse>);

fn api_error(e: &ControlError) -> ApiError {
    (
        error_to_status(e),
        Json(ErrorResponse {
            error: e.to_string(),
            kind: e.kind(),
        }),
    )
}

fn site_url(site: &str) -> String {
    format!("http://{site}")
}

/// List all sites.
pub async fn list_sites(State(state): State<AppState>) -> Result<Json<Vec<String>>, ApiError> {
    state
        .orchestrator
        .list_sites()
        .await
        .map(Json)
        .map_err(|e| api_error(&e))
}

/// List the applications available in the bench.
pub async fn list_apps(State(state): State<AppState>) -> Result<Json<Vec<String>>, ApiError> {
    state
        .orchestrator
        .list_workspace_apps()
        .await
        .map(Json)
        .map_err(|e| api_error(&e))
}

/// Get one site and its installed applications.
pub async fn get_site(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<SiteResponse>, ApiError> {
    let apps = state
        .orchestrator
        .list_installed_apps(&name)
        .await
        .map_err(|e| api_error(&e))?;
    Ok(Json(SiteResponse {
        url: site_url(&name),
        site: name,
        apps,
    }))
}

/// Create a site, install its applications and restart the bench.
pub async fn create_site(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Json(request): Json<CreateSiteRequest>,
) -> Result<(StatusCode, Json<SiteCreatedResponse>), ApiError> {
    info!(site = %name, apps = ?request.apps, "creating site via API");

    let created = state
        .orchestrator
        .create_site_with_apps(&name, &request.apps)
        .await
        .map_err(|e| api_error(&e))?;

    Ok((
        StatusCode::CREATED,
        Json(SiteCreatedResponse {
            url: site_url(&created.site),
            site: created.site,
            apps: created.apps,
            restarted: created.restarted,
            restart_error: created.restart_error,
        }),
    ))
}

/// Current lifecycle state.
pub async fn status(State(state): State<AppState>) -> Json<DeploymentStatus> {
    Json(state.orchestrator.status())
}

/// Restart whichever mode is running.
pub async fn restart(State(state): State<AppState>) -> Result<StatusCode, ApiError> {
    info!("restart requested via API");
    state
        .orchestrator
        .restart()
        .await
        .map(|()| StatusCode::NO_CONTENT)
        .map_err(|e| api_error(&e))
}

const fn error_to_status(error: &ControlError) -> StatusCode {
    match error {
        ControlError::SiteNotFound(_) => StatusCode::NOT_FOUND,
        ControlError::InvalidSiteName(_) | ControlError::InvalidAppName(_) => {
            StatusCode::BAD_REQUEST
        }
        ControlError::SiteAlreadyExists(_)
        | ControlError::AlreadyRunning { .. }
        | ControlError::AlreadyUnmanaged
        | ControlError::NotRunning { .. }
        | ControlError::Unmanaged
        | ControlError::NothingToRestart => StatusCode::CONFLICT,
        ControlError::Unready { .. } => StatusCode::SERVICE_UNAVAILABLE,
        ControlError::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
        ControlError::FetchFailed { .. }
        | ControlError::QueryFailed { .. }
        | ControlError::SiteCreateFailed { .. }
        | ControlError::SiteDropFailed { .. }
        | ControlError::InstallFailed { .. }
        | ControlError::UninstallFailed { .. }
        | ControlError::MigrateFailed { .. }
        | ControlError::Exec(_) => StatusCode::BAD_GATEWAY,
        ControlError::WorkspaceUnreadable { .. }
        | ControlError::CleanupFailed { .. }
        | ControlError::RegenerateFailed { .. }
        | ControlError::Io { .. }
        | ControlError::Config(_)
        | ControlError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}
