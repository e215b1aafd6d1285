//! Pipeline Run API Handlers
//!
//! HTTP endpoints for triggering, inspecting, approving and cancelling runs.

use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
};
use gantry_core::domain::environment::Environment;
use gantry_core::domain::run::PipelineRun;
use gantry_core::dto::run::{RunSummary, TriggerRun};
use serde::Deserialize;
use uuid::Uuid;

use crate::api::AppState;
use crate::api::error::{ApiError, ApiResult};

#[derive(Debug, Deserialize)]
pub struct ListRunsQuery {
    pub environment: Option<Environment>,
}

/// POST /run/trigger
/// Create a run and execute it in the background
pub async fn trigger_run(
    State(state): State<AppState>,
    Json(req): Json<TriggerRun>,
) -> ApiResult<(StatusCode, Json<PipelineRun>)> {
    tracing::info!(
        "Triggering {} run for {}@{}",
        req.environment,
        req.branch,
        req.commit
    );

    let run = state.orchestrator.trigger(req).await?;
    Ok((StatusCode::ACCEPTED, Json(run)))
}

/// GET /run/list
/// List runs, newest first
pub async fn list_runs(
    State(state): State<AppState>,
    Query(query): Query<ListRunsQuery>,
) -> ApiResult<Json<Vec<RunSummary>>> {
    tracing::debug!("Listing runs");

    let runs = state.orchestrator.list_runs(query.environment).await?;
    Ok(Json(runs.iter().map(RunSummary::from).collect()))
}

/// GET /run/{id}
pub async fn get_run(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<PipelineRun>> {
    tracing::debug!("Getting run: {}", id);

    let run = find_run(&state, id).await?;
    Ok(Json(run))
}

/// POST /run/{id}/approve
/// Operator sign-off for a production run
pub async fn approve_run(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<PipelineRun>> {
    let run = find_run(&state, id).await?;

    if !run.environment.requires_approval() {
        return Err(ApiError::BadRequest(format!(
            "{} runs do not require approval",
            run.environment
        )));
    }
    if run.status.is_terminal() {
        return Err(ApiError::Conflict(format!(
            "Run {} already finished ({})",
            id, run.status
        )));
    }

    state.approvals.approve(id).await;
    Ok(Json(run))
}

/// POST /run/{id}/cancel
/// Request cancellation at the next stage boundary
pub async fn cancel_run(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<(StatusCode, Json<PipelineRun>)> {
    tracing::info!("Cancelling run: {}", id);

    let run = state.orchestrator.cancel(id).await?;
    Ok((StatusCode::ACCEPTED, Json(run)))
}

// ===== Helper Functions ===== //

async fn find_run(state: &AppState, id: Uuid) -> ApiResult<PipelineRun> {
    state
        .orchestrator
        .get_run(id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Run {} not found", id)))
}
