//! HTTP API for the bench.
//!
//! Provides endpoints for:
//! - Site listing, inspection and creation
//! - The workspace application pool
//! - Lifecycle status and restart
//! - Health checks

mod sites;

use std::sync::Arc;

use axum::{
    Router,
    routing::{get, post},
};

use crate::orchestrator::BenchOrchestrator;

pub use sites::{CreateSiteRequest, ErrorResponse, SiteCreatedResponse, SiteResponse};

/// Shared application state for the HTTP API.
#[derive(Clone)]
pub struct AppState {
    /// Orchestrator behind every endpoint.
    pub orchestrator: Arc<BenchOrchestrator>,
}

/// Creates the API router.
pub fn router(state: AppState) -> Router {
    let bench = Router::new()
        .route("/sites", get(sites::list_sites))
        .route("/apps", get(sites::list_apps))
        .route(
            "/site/{name}",
            get(sites::get_site).put(sites::create_site),
        )
        .route("/status", get(sites::status))
        .route("/restart", post(sites::restart));

    Router::new()
        .route("/health", get(health_check))
        .nest("/api/bench", bench)
        .with_state(state)
}

/// Health check endpoint.
async fn health_check() -> axum::Json<HealthResponse> {
    axum::Json(HealthResponse { status: "healthy" })
}

/// Health response.
#[derive(serde::Serialize)]
struct HealthResponse {
    status: &'static str,
}
