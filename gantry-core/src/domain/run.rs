//! Pipeline run domain types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::address::Address;
use super::environment::Environment;
use super::failure::StageFailure;
use super::image::ImageReference;
use super::revision::Revision;
use super::rollback::RollbackReport;
use super::service::Service;

/// One execution of an environment pipeline
///
/// Owned by the orchestrator: created at trigger time, finalized when it
/// reaches a terminal status.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineRun {
    pub id: Uuid,
    pub run_number: u64,
    pub environment: Environment,
    pub revision: Revision,
    pub status: RunStatus,
    /// One entry per service, in deploy order
    pub stages: Vec<StageResult>,
    pub approved_at: Option<DateTime<Utc>>,
    pub failure: Option<StageFailure>,
    pub rollback: Option<RollbackReport>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl PipelineRun {
    pub fn new(
        run_number: u64,
        environment: Environment,
        revision: Revision,
        deploy_order: &[Service],
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            run_number,
            environment,
            revision,
            status: RunStatus::Pending,
            stages: deploy_order.iter().map(|s| StageResult::new(*s)).collect(),
            approved_at: None,
            failure: None,
            rollback: None,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
        }
    }

    pub fn stage(&self, service: Service) -> Option<&StageResult> {
        self.stages.iter().find(|s| s.service == service)
    }

    pub fn stage_mut(&mut self, service: Service) -> Option<&mut StageResult> {
        self.stages.iter_mut().find(|s| s.service == service)
    }

    /// Marks the run running
    pub fn start(&mut self) {
        self.status = RunStatus::Running;
        self.started_at = Some(Utc::now());
    }

    /// Moves the run to a terminal status
    pub fn finish(&mut self, status: RunStatus) {
        debug_assert!(status.is_terminal());
        self.status = status;
        self.completed_at = Some(Utc::now());
    }
}

/// Lifecycle status of a pipeline run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RunStatus {
    /// Created, waiting for the environment lease
    Pending,
    Running,
    Succeeded,
    Failed,
    RolledBack,
    /// Automatic rollback did not restore health; needs an operator
    RollbackFailed,
    Cancelled,
}

impl RunStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, RunStatus::Pending | RunStatus::Running)
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunStatus::Pending => write!(f, "pending"),
            RunStatus::Running => write!(f, "running"),
            RunStatus::Succeeded => write!(f, "succeeded"),
            RunStatus::Failed => write!(f, "failed"),
            RunStatus::RolledBack => write!(f, "rolled-back"),
            RunStatus::RollbackFailed => write!(f, "rollback-failed"),
            RunStatus::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Build, deploy and validate result of one service within a run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageResult {
    pub service: Service,
    pub status: StageStatus,
    pub image: Option<ImageReference>,
    pub address: Option<Address>,
    pub failure: Option<StageFailure>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl StageResult {
    fn new(service: Service) -> Self {
        Self {
            service,
            status: StageStatus::NotAttempted,
            image: None,
            address: None,
            failure: None,
            started_at: None,
            finished_at: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StageStatus {
    NotAttempted,
    Running,
    Succeeded,
    Failed,
}
