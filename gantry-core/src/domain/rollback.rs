//! Rollback domain types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::environment::Environment;
use super::image::ImageReference;
use super::service::Service;

/// Who asked for the rollback
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum RollbackTrigger {
    Operator,
    /// Automatic rollback after the given run failed
    Run { run_id: Uuid },
}

/// What happened to one service during a rollback
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "kebab-case")]
pub enum ServiceRollbackOutcome {
    /// Prior image redeployed and healthy again
    Reverted {
        from: ImageReference,
        to: ImageReference,
    },
    /// Nothing to undo for this service
    Skipped,
    /// No earlier successful record exists; the cluster was not touched
    NoPriorRecord,
    DeployFailed { to: ImageReference, reason: String },
    HealthCheckFailed { to: ImageReference },
    /// Not attempted because an earlier service in the rollback failed
    Halted,
}

impl ServiceRollbackOutcome {
    pub fn is_failure(&self) -> bool {
        !matches!(
            self,
            ServiceRollbackOutcome::Reverted { .. } | ServiceRollbackOutcome::Skipped
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceRollback {
    pub service: Service,
    #[serde(flatten)]
    pub outcome: ServiceRollbackOutcome,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RollbackStatus {
    Completed,
    /// At least one service could not be restored; manual intervention required
    Failed,
}

/// Result of one rollback, services listed in the order they were reverted
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RollbackReport {
    pub environment: Environment,
    pub trigger: RollbackTrigger,
    pub status: RollbackStatus,
    pub services: Vec<ServiceRollback>,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
}

impl RollbackReport {
    pub fn outcome(&self, service: Service) -> Option<&ServiceRollbackOutcome> {
        self.services
            .iter()
            .find(|s| s.service == service)
            .map(|s| &s.outcome)
    }
}
