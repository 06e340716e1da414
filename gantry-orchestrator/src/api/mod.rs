//! API Module
//!
//! HTTP API layer for the orchestrator.
//! Each submodule handles endpoints for a specific domain.

pub mod error;
pub mod health;
pub mod run;
pub mod workflow;

use axum::{
    Router,
    routing::{get, post},
};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::service::{RunService, WorkflowService};

/// Shared handler state
#[derive(Clone)]
pub struct AppState {
    pub workflows: WorkflowService,
    pub runs: Arc<RunService>,
}

/// Create the main API router with all endpoints
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Health check
        .route("/health", get(health::health_check))
        // Workflow endpoints
        .route(
            "/api/workflows",
            post(workflow::upload_workflow).get(workflow::list_workflows),
        )
        .route(
            "/api/workflows/{name}",
            get(workflow::get_workflow).delete(workflow::delete_workflow),
        )
        .route(
            "/api/workflows/{name}/trigger",
            post(workflow::trigger_workflow),
        )
        .route("/api/workflows/{name}/runs", get(workflow::list_workflow_runs))
        .route("/api/workflows/{name}/stats", get(workflow::workflow_stats))
        // Run endpoints
        .route("/api/runs", get(run::list_runs))
        .route("/api/runs/{id}", get(run::get_run))
        // Add state and middleware
        .with_state(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}
