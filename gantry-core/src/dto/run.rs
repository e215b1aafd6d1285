//! Pipeline run DTOs

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::environment::Environment;
use crate::domain::run::{PipelineRun, RunStatus};

/// Request to start a pipeline run for a source revision
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriggerRun {
    pub environment: Environment,
    pub commit: String,
    pub branch: String,
}

/// Run summary for listing
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSummary {
    pub id: Uuid,
    pub run_number: u64,
    pub environment: Environment,
    pub revision: String,
    pub status: RunStatus,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl From<&PipelineRun> for RunSummary {
    fn from(run: &PipelineRun) -> Self {
        Self {
            id: run.id,
            run_number: run.run_number,
            environment: run.environment,
            revision: run.revision.to_string(),
            status: run.status,
            created_at: run.created_at,
            completed_at: run.completed_at,
        }
    }
}
