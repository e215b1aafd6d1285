//! Rollback API Handler

use axum::{Json, extract::State};
use gantry_core::domain::rollback::RollbackReport;
use gantry_core::dto::rollback::RollbackRequest;

use crate::api::AppState;
use crate::api::error::ApiResult;

/// POST /rollback
/// Operator rollback of one service, or of every service in the environment
pub async fn rollback(
    State(state): State<AppState>,
    Json(req): Json<RollbackRequest>,
) -> ApiResult<Json<RollbackReport>> {
    match req.service {
        Some(service) => tracing::info!("Rolling back {} in {}", service, req.environment),
        None => tracing::info!("Rolling back every service in {}", req.environment),
    }

    let report = state
        .orchestrator
        .rollback(req.environment, req.service)
        .await?;
    Ok(Json(report))
}
