//! Deployment History API Handler

use axum::{
    Json,
    extract::{Path, State},
};
use gantry_core::domain::environment::Environment;
use gantry_core::domain::record::DeploymentRecord;
use gantry_core::domain::service::Service;

use crate::api::AppState;
use crate::api::error::ApiResult;

/// GET /deployment/{environment}/{service}/history
/// Every recorded deployment of a service, oldest first
pub async fn history(
    State(state): State<AppState>,
    Path((environment, service)): Path<(Environment, Service)>,
) -> ApiResult<Json<Vec<DeploymentRecord>>> {
    tracing::debug!("Getting history of {} in {}", service, environment);

    let records = state.orchestrator.history(environment, service).await?;
    Ok(Json(records))
}
