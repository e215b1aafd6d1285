//! Deployment Executor
//!
//! Applies a new desired image to a cluster, waits for the rollout to reach
//! a terminal state and appends exactly one DeploymentRecord for it.
//! Outcomes that cannot be established (the control plane never answered)
//! produce no record at all.

use chrono::Utc;
use gantry_core::domain::environment::Environment;
use gantry_core::domain::failure::FailureKind;
use gantry_core::domain::image::ImageReference;
use gantry_core::domain::record::{DeploymentOutcome, DeploymentPurpose, DeploymentRecord};
use gantry_core::domain::service::Service;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::collaborator::{ApplyResponse, ClusterControlPlane, RolloutStatus};
use crate::repository::{DeploymentLog, StoreError};
use crate::service::poll::Deadline;

/// Who a deployment is done for; copied into its record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeployContext {
    pub run_id: Option<Uuid>,
    pub run_number: Option<u64>,
    pub purpose: DeploymentPurpose,
}

impl DeployContext {
    pub fn release(run_id: Uuid, run_number: u64) -> Self {
        Self {
            run_id: Some(run_id),
            run_number: Some(run_number),
            purpose: DeploymentPurpose::Release,
        }
    }

    pub fn rollback(run_id: Option<Uuid>) -> Self {
        Self {
            run_id,
            run_number: None,
            purpose: DeploymentPurpose::Rollback,
        }
    }
}

/// Why a rollout ended without all replicas ready
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RolloutFailure {
    Timeout,
    Rejected,
    Failed,
}

impl RolloutFailure {
    pub fn as_str(&self) -> &'static str {
        match self {
            RolloutFailure::Timeout => "timeout",
            RolloutFailure::Rejected => "rejected",
            RolloutFailure::Failed => "failed",
        }
    }

    pub fn kind(&self) -> FailureKind {
        match self {
            RolloutFailure::Timeout => FailureKind::RolloutTimeout,
            RolloutFailure::Rejected => FailureKind::RolloutRejected,
            RolloutFailure::Failed => FailureKind::RolloutFailed,
        }
    }
}

impl fmt::Display for RolloutFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Terminal rollout outcome together with the record written for it
#[derive(Debug, Clone)]
pub struct RolloutResult {
    pub failure: Option<RolloutFailure>,
    /// Extra context from the control plane, e.g. the rejection message
    pub detail: Option<String>,
    pub record: DeploymentRecord,
}

impl RolloutResult {
    pub fn is_success(&self) -> bool {
        self.failure.is_none()
    }

    /// Human readable reason, `None` on success
    pub fn reason(&self) -> Option<String> {
        self.failure.map(|failure| match &self.detail {
            Some(detail) => format!("{}: {}", failure, detail),
            None => failure.to_string(),
        })
    }
}

#[derive(Debug, Error)]
pub enum DeployError {
    /// The outcome could not be established; nothing was recorded
    #[error("rollout of {service} in {environment} has unknown outcome: {reason}")]
    Unknown {
        environment: Environment,
        service: Service,
        reason: String,
    },

    /// The rollout reached a terminal state but its record could not be stored
    #[error("rollout of {service} in {environment} finished but was not recorded: {source}")]
    Record {
        environment: Environment,
        service: Service,
        #[source]
        source: StoreError,
    },
}

pub struct DeploymentExecutor {
    cluster: Arc<dyn ClusterControlPlane>,
    log: Arc<dyn DeploymentLog>,
    timeout: Duration,
    interval: Duration,
    append_attempts: u32,
}

impl DeploymentExecutor {
    pub fn new(
        cluster: Arc<dyn ClusterControlPlane>,
        log: Arc<dyn DeploymentLog>,
        timeout: Duration,
        interval: Duration,
        append_attempts: u32,
    ) -> Self {
        Self {
            cluster,
            log,
            timeout,
            interval,
            append_attempts: append_attempts.max(1),
        }
    }

    /// Deploys `image` and records the terminal outcome
    pub async fn deploy(
        &self,
        environment: Environment,
        service: Service,
        image: &ImageReference,
        context: &DeployContext,
    ) -> Result<RolloutResult, DeployError> {
        info!("Deploying {} to {}", image, environment);

        let (failure, detail) = match self
            .cluster
            .apply_deployment(environment, service, image)
            .await
        {
            Ok(ApplyResponse::Rejected { reason }) => {
                warn!("{} rejected {}: {}", environment.cluster(), image, reason);
                (Some(RolloutFailure::Rejected), Some(reason))
            }
            Ok(ApplyResponse::Accepted) => {
                self.wait_rollout(environment, service, image).await?
            }
            Err(e) => {
                return Err(DeployError::Unknown {
                    environment,
                    service,
                    reason: e.to_string(),
                });
            }
        };

        let record = DeploymentRecord {
            id: Uuid::new_v4(),
            environment,
            service,
            image: image.clone(),
            run_id: context.run_id,
            run_number: context.run_number,
            purpose: context.purpose,
            outcome: if failure.is_none() {
                DeploymentOutcome::Succeeded
            } else {
                DeploymentOutcome::Failed
            },
            reason: failure.map(|f| f.to_string()),
            recorded_at: Utc::now(),
        };

        self.append_with_retry(&record).await?;

        Ok(RolloutResult {
            failure,
            detail,
            record,
        })
    }

    async fn wait_rollout(
        &self,
        environment: Environment,
        service: Service,
        image: &ImageReference,
    ) -> Result<(Option<RolloutFailure>, Option<String>), DeployError> {
        let deadline = Deadline::new(self.timeout, self.interval);
        let mut observed = false;
        let mut last_error = None;

        loop {
            match self.cluster.rollout_status(environment, service, image).await {
                Ok(RolloutStatus::Ready) => {
                    info!("Rollout of {} in {} complete", image, environment);
                    return Ok((None, None));
                }
                Ok(RolloutStatus::Failed) => {
                    warn!("Rollout of {} in {} failed", image, environment);
                    return Ok((Some(RolloutFailure::Failed), None));
                }
                Ok(RolloutStatus::Pending) => {
                    observed = true;
                    debug!("Rollout of {} in {} pending", image, environment);
                }
                Err(e) => {
                    warn!("Rollout status of {} unavailable: {}", image, e);
                    last_error = Some(e.to_string());
                }
            }

            if !deadline.wait_next().await {
                break;
            }
        }

        if observed {
            warn!("Rollout of {} in {} timed out after {:?}", image, environment, self.timeout);
            Ok((
                Some(RolloutFailure::Timeout),
                Some(format!("replicas not ready within {:?}", self.timeout)),
            ))
        } else {
            Err(DeployError::Unknown {
                environment,
                service,
                reason: last_error
                    .unwrap_or_else(|| "no rollout status observed".to_string()),
            })
        }
    }

    /// Appends `record`, retrying transient store failures with backoff
    ///
    /// The record id is fixed before the first attempt, so an append that
    /// succeeded but reported an error is deduplicated on retry.
    async fn append_with_retry(&self, record: &DeploymentRecord) -> Result<(), DeployError> {
        const INITIAL_DELAY_MS: u64 = 100;
        const MAX_DELAY_MS: u64 = 5_000;

        let mut attempt = 0;
        let mut delay_ms = INITIAL_DELAY_MS;

        loop {
            attempt += 1;

            match self.log.append(record).await {
                Ok(inserted) => {
                    if !inserted {
                        debug!("Record {} already present", record.id);
                    }
                    if attempt > 1 {
                        info!("Recorded {} after {} attempt(s)", record.image, attempt);
                    }
                    return Ok(());
                }
                Err(e) => {
                    if attempt >= self.append_attempts {
                        error!(
                            "Failed to record {} after {} attempts",
                            record.image, attempt
                        );
                        return Err(DeployError::Record {
                            environment: record.environment,
                            service: record.service,
                            source: e,
                        });
                    }

                    warn!(
                        "Append of record {} failed (attempt {}/{}): {}. Retrying in {}ms",
                        record.id, attempt, self.append_attempts, e, delay_ms
                    );
                    tokio::time::sleep(Duration::from_millis(delay_ms)).await;
                    delay_ms = (delay_ms * 2).min(MAX_DELAY_MS);
                }
            }
        }
    }
}
