//! Rollback DTOs

use serde::{Deserialize, Serialize};

use crate::domain::environment::Environment;
use crate::domain::service::Service;

/// Operator request to roll back one service, or every service when `service` is absent
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RollbackRequest {
    pub environment: Environment,
    #[serde(default)]
    pub service: Option<Service>,
}
