//! Deployment Record Repository
//!
//! Append is the only mutation. Appends are keyed by record id so retrying
//! an append after a lost acknowledgement never produces a duplicate.

use async_trait::async_trait;
use gantry_core::domain::environment::Environment;
use gantry_core::domain::image::ImageReference;
use gantry_core::domain::record::{DeploymentOutcome, DeploymentPurpose, DeploymentRecord};
use gantry_core::domain::service::Service;
use sqlx::PgPool;
use tokio::sync::{Mutex, RwLock};
use uuid::Uuid;

use super::StoreError;

#[async_trait]
pub trait DeploymentLog: Send + Sync {
    /// Appends a record; returns `false` when a record with the same id already exists
    async fn append(&self, record: &DeploymentRecord) -> Result<bool, StoreError>;

    /// Every record of a service in an environment, oldest first
    async fn history(
        &self,
        environment: Environment,
        service: Service,
    ) -> Result<Vec<DeploymentRecord>, StoreError>;

    /// Records written on behalf of a pipeline run, oldest first
    async fn records_for_run(&self, run_id: Uuid) -> Result<Vec<DeploymentRecord>, StoreError>;

    /// Highest run number that appears in a record
    async fn max_run_number(&self) -> Result<Option<u64>, StoreError>;

    /// Hands out the next run number. A number is never handed out twice,
    /// including to runs that finished without writing a record.
    async fn reserve_run_number(&self) -> Result<u64, StoreError>;
}

// =============================================================================
// In-memory log
// =============================================================================

/// Process-local log used by tests and ephemeral installations
#[derive(Debug, Default)]
pub struct InMemoryDeploymentLog {
    records: RwLock<Vec<DeploymentRecord>>,
    last_run_number: Mutex<u64>,
}

impl InMemoryDeploymentLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every record in append order
    pub async fn all(&self) -> Vec<DeploymentRecord> {
        self.records.read().await.clone()
    }
}

#[async_trait]
impl DeploymentLog for InMemoryDeploymentLog {
    async fn append(&self, record: &DeploymentRecord) -> Result<bool, StoreError> {
        let mut records = self.records.write().await;
        if records.iter().any(|r| r.id == record.id) {
            return Ok(false);
        }
        records.push(record.clone());
        Ok(true)
    }

    async fn history(
        &self,
        environment: Environment,
        service: Service,
    ) -> Result<Vec<DeploymentRecord>, StoreError> {
        let records = self.records.read().await;
        Ok(records
            .iter()
            .filter(|r| r.environment == environment && r.service == service)
            .cloned()
            .collect())
    }

    async fn records_for_run(&self, run_id: Uuid) -> Result<Vec<DeploymentRecord>, StoreError> {
        let records = self.records.read().await;
        Ok(records
            .iter()
            .filter(|r| r.run_id == Some(run_id))
            .cloned()
            .collect())
    }

    async fn max_run_number(&self) -> Result<Option<u64>, StoreError> {
        let records = self.records.read().await;
        Ok(records.iter().filter_map(|r| r.run_number).max())
    }

    async fn reserve_run_number(&self) -> Result<u64, StoreError> {
        let recorded = self.max_run_number().await?.unwrap_or(0);
        let mut last = self.last_run_number.lock().await;
        *last = (*last).max(recorded) + 1;
        Ok(*last)
    }
}

// =============================================================================
// PostgreSQL log
// =============================================================================

/// Durable log; survives orchestrator restarts
#[derive(Debug, Clone)]
pub struct PgDeploymentLog {
    pool: PgPool,
}

impl PgDeploymentLog {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl DeploymentLog for PgDeploymentLog {
    async fn append(&self, record: &DeploymentRecord) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r#"
            INSERT INTO deployment_records
                (id, environment, service, image_tag, run_id, run_number,
                 purpose, outcome, reason, recorded_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            ON CONFLICT (id) DO NOTHING
            "#,
        )
        .bind(record.id)
        .bind(record.environment.as_str())
        .bind(record.service.as_str())
        .bind(&record.image.tag)
        .bind(record.run_id)
        .bind(record.run_number.map(|n| n as i64))
        .bind(purpose_to_string(record.purpose))
        .bind(outcome_to_string(record.outcome))
        .bind(&record.reason)
        .bind(record.recorded_at)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn history(
        &self,
        environment: Environment,
        service: Service,
    ) -> Result<Vec<DeploymentRecord>, StoreError> {
        let rows = sqlx::query_as::<_, RecordRow>(
            r#"
            SELECT id, environment, service, image_tag, run_id, run_number,
                   purpose, outcome, reason, recorded_at
            FROM deployment_records
            WHERE environment = $1 AND service = $2
            ORDER BY seq ASC
            "#,
        )
        .bind(environment.as_str())
        .bind(service.as_str())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(DeploymentRecord::try_from).collect()
    }

    async fn records_for_run(&self, run_id: Uuid) -> Result<Vec<DeploymentRecord>, StoreError> {
        let rows = sqlx::query_as::<_, RecordRow>(
            r#"
            SELECT id, environment, service, image_tag, run_id, run_number,
                   purpose, outcome, reason, recorded_at
            FROM deployment_records
            WHERE run_id = $1
            ORDER BY seq ASC
            "#,
        )
        .bind(run_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(DeploymentRecord::try_from).collect()
    }

    async fn max_run_number(&self) -> Result<Option<u64>, StoreError> {
        let row: (Option<i64>,) = sqlx::query_as("SELECT MAX(run_number) FROM deployment_records")
            .fetch_one(&self.pool)
            .await?;

        Ok(row.0.map(|n| n as u64))
    }

    async fn reserve_run_number(&self) -> Result<u64, StoreError> {
        let row: (i64,) = sqlx::query_as("SELECT nextval('run_numbers')")
            .fetch_one(&self.pool)
            .await?;

        Ok(row.0 as u64)
    }
}

// =============================================================================
// Helper Functions
// =============================================================================

fn purpose_to_string(purpose: DeploymentPurpose) -> &'static str {
    match purpose {
        DeploymentPurpose::Release => "release",
        DeploymentPurpose::Rollback => "rollback",
    }
}

fn string_to_purpose(s: &str) -> Result<DeploymentPurpose, StoreError> {
    match s {
        "release" => Ok(DeploymentPurpose::Release),
        "rollback" => Ok(DeploymentPurpose::Rollback),
        other => Err(StoreError::Corrupt(format!("unknown purpose '{}'", other))),
    }
}

fn outcome_to_string(outcome: DeploymentOutcome) -> &'static str {
    match outcome {
        DeploymentOutcome::Succeeded => "succeeded",
        DeploymentOutcome::Failed => "failed",
    }
}

fn string_to_outcome(s: &str) -> Result<DeploymentOutcome, StoreError> {
    match s {
        "succeeded" => Ok(DeploymentOutcome::Succeeded),
        "failed" => Ok(DeploymentOutcome::Failed),
        other => Err(StoreError::Corrupt(format!("unknown outcome '{}'", other))),
    }
}

// =============================================================================
// Database Row Types
// =============================================================================

#[derive(sqlx::FromRow)]
struct RecordRow {
    id: Uuid,
    environment: String,
    service: String,
    image_tag: String,
    run_id: Option<Uuid>,
    run_number: Option<i64>,
    purpose: String,
    outcome: String,
    reason: Option<String>,
    recorded_at: chrono::DateTime<chrono::Utc>,
}

impl TryFrom<RecordRow> for DeploymentRecord {
    type Error = StoreError;

    fn try_from(row: RecordRow) -> Result<Self, Self::Error> {
        let environment: Environment = row.environment.parse().map_err(StoreError::Corrupt)?;
        let service: Service = row.service.parse().map_err(StoreError::Corrupt)?;

        Ok(DeploymentRecord {
            id: row.id,
            environment,
            service,
            image: ImageReference {
                service,
                environment,
                tag: row.image_tag,
            },
            run_id: row.run_id,
            run_number: row.run_number.map(|n| n as u64),
            purpose: string_to_purpose(&row.purpose)?,
            outcome: string_to_outcome(&row.outcome)?,
            reason: row.reason,
            recorded_at: row.recorded_at,
        })
    }
}
