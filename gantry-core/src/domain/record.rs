//! Deployment records
//!
//! The append-only history of terminal rollout outcomes. It is the only
//! source of truth for rollback targets, so a record exists only when the
//! cluster confirmed success or an explicit failure.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::environment::Environment;
use super::image::ImageReference;
use super::service::Service;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DeploymentOutcome {
    Succeeded,
    Failed,
}

/// Why the image was deployed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DeploymentPurpose {
    Release,
    Rollback,
}

/// One terminal deployment outcome. Never mutated after creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentRecord {
    /// Identity of the deployment attempt; appending the same id twice is a no-op
    pub id: Uuid,
    pub environment: Environment,
    pub service: Service,
    pub image: ImageReference,
    /// Pipeline run that caused the deployment, absent for operator rollbacks
    pub run_id: Option<Uuid>,
    pub run_number: Option<u64>,
    pub purpose: DeploymentPurpose,
    pub outcome: DeploymentOutcome,
    /// Failure reason (`timeout`, `rejected`, `failed`)
    pub reason: Option<String>,
    pub recorded_at: DateTime<Utc>,
}

impl DeploymentRecord {
    pub fn is_success(&self) -> bool {
        self.outcome == DeploymentOutcome::Succeeded
    }
}
