//! Run API Handlers
//!
//! Read-only views of workflow runs.

use axum::{
    Json,
    extract::{Path, State},
};
use gantry_core::domain::run::WorkflowRun;

use crate::api::AppState;
use crate::api::error::ApiResult;

/// GET /api/runs
/// List all runs, newest first
pub async fn list_runs(State(state): State<AppState>) -> ApiResult<Json<Vec<WorkflowRun>>> {
    tracing::debug!("Listing all runs");

    Ok(Json(state.runs.list_runs().await?))
}

/// GET /api/runs/{id}
pub async fn get_run(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<WorkflowRun>> {
    Ok(Json(state.runs.get_run(&id).await?))
}
