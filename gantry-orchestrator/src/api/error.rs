//! API Error Handling
//!
//! Unified error types and conversion for API responses.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};

use crate::repository::StoreError;
use crate::service::rollback::RollbackError;
use crate::service::{CancelError, OperatorRollbackError, TriggerError};

/// API error type
#[derive(Debug)]
pub enum ApiError {
    NotFound(String),
    BadRequest(String),
    Conflict(String),
    Store(StoreError),
    InternalError(String),
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::Store(_) | ApiError::InternalError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = match self {
            ApiError::NotFound(msg) | ApiError::BadRequest(msg) | ApiError::Conflict(msg) => msg,
            ApiError::Store(err) => {
                tracing::error!("Store error: {:?}", err);
                "Internal server error".to_string()
            }
            ApiError::InternalError(msg) => {
                tracing::error!("Internal error: {}", msg);
                msg
            }
        };

        (status, Json(serde_json::json!({ "error": message }))).into_response()
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        ApiError::Store(err)
    }
}

impl From<TriggerError> for ApiError {
    fn from(err: TriggerError) -> Self {
        match err {
            TriggerError::Store(err) => ApiError::Store(err),
            other => ApiError::BadRequest(other.to_string()),
        }
    }
}

impl From<CancelError> for ApiError {
    fn from(err: CancelError) -> Self {
        match err {
            CancelError::NotFound(id) => ApiError::NotFound(format!("Run {} not found", id)),
            CancelError::Store(err) => ApiError::Store(err),
            other @ CancelError::AlreadyFinished { .. } => ApiError::Conflict(other.to_string()),
        }
    }
}

impl From<OperatorRollbackError> for ApiError {
    fn from(err: OperatorRollbackError) -> Self {
        match err {
            busy @ OperatorRollbackError::EnvironmentBusy(_) => ApiError::Conflict(busy.to_string()),
            OperatorRollbackError::Rollback(RollbackError::Store(err)) => ApiError::Store(err),
            OperatorRollbackError::Rollback(other) => ApiError::BadRequest(other.to_string()),
        }
    }
}

pub type ApiResult<T> = Result<T, ApiError>;
