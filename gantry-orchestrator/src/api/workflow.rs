//! Workflow API Handlers
//!
//! HTTP endpoints for workflow management.

use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};
use gantry_core::domain::run::WorkflowRun;
use gantry_core::domain::workflow::Workflow;
use gantry_core::dto::workflow::{WorkflowStats, WorkflowUploaded};

use crate::api::AppState;
use crate::api::error::ApiResult;

/// POST /api/workflows
/// Store a workflow from its YAML definition
pub async fn upload_workflow(
    State(state): State<AppState>,
    body: String,
) -> ApiResult<Json<WorkflowUploaded>> {
    let workflow = state.workflows.create_workflow(&body).await?;

    Ok(Json(WorkflowUploaded::new(workflow.name)))
}

/// GET /api/workflows
pub async fn list_workflows(State(state): State<AppState>) -> ApiResult<Json<Vec<Workflow>>> {
    tracing::debug!("Listing all workflows");

    Ok(Json(state.workflows.list_workflows().await?))
}

/// GET /api/workflows/{name}
pub async fn get_workflow(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> ApiResult<Json<Workflow>> {
    tracing::debug!("Getting workflow: {}", name);

    Ok(Json(state.workflows.get_workflow(&name).await?))
}

/// DELETE /api/workflows/{name}
/// Delete a workflow and its run history
pub async fn delete_workflow(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> ApiResult<StatusCode> {
    tracing::info!("Deleting workflow: {}", name);

    state.workflows.delete_workflow(&name).await?;

    Ok(StatusCode::NO_CONTENT)
}

/// POST /api/workflows/{name}/trigger
/// Start a run; responds as soon as the run is recorded
pub async fn trigger_workflow(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> ApiResult<Json<WorkflowRun>> {
    tracing::info!("Triggering workflow: {}", name);

    Ok(Json(state.runs.trigger_workflow(&name).await?))
}

/// GET /api/workflows/{name}/runs
pub async fn list_workflow_runs(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> ApiResult<Json<Vec<WorkflowRun>>> {
    Ok(Json(state.workflows.list_workflow_runs(&name).await?))
}

/// GET /api/workflows/{name}/stats
pub async fn workflow_stats(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> ApiResult<Json<WorkflowStats>> {
    Ok(Json(state.workflows.workflow_stats(&name).await?))
}
