//! Rollback Controller
//!
//! Reverts services to their most recent earlier successful deployment,
//! dependants first. Every target is resolved from the deployment log
//! before the cluster is touched; a service with nothing to return to is
//! reported and left alone.

use chrono::Utc;
use gantry_core::domain::environment::Environment;
use gantry_core::domain::image::ImageReference;
use gantry_core::domain::record::{DeploymentPurpose, DeploymentRecord};
use gantry_core::domain::rollback::{
    RollbackReport, RollbackStatus, RollbackTrigger, ServiceRollback, ServiceRollbackOutcome,
};
use gantry_core::domain::service::{Service, ServiceCatalog};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::repository::{DeploymentLog, StoreError};
use crate::service::deployer::{DeployContext, DeploymentExecutor};
use crate::service::health::HealthProber;

#[derive(Debug, Error)]
pub enum RollbackError {
    #[error("{0} is not in the service catalog")]
    UnknownService(Service),

    #[error("could not read deployment history: {0}")]
    Store(#[from] StoreError),
}

/// What will be done for one service, decided before any mutation
#[derive(Debug, Clone)]
enum Plan {
    Revert {
        from: ImageReference,
        to: ImageReference,
    },
    Skip,
    NoPriorRecord,
}

pub struct RollbackController {
    catalog: Arc<ServiceCatalog>,
    log: Arc<dyn DeploymentLog>,
    executor: Arc<DeploymentExecutor>,
    prober: Arc<HealthProber>,
    health_timeout: Duration,
}

impl RollbackController {
    pub fn new(
        catalog: Arc<ServiceCatalog>,
        log: Arc<dyn DeploymentLog>,
        executor: Arc<DeploymentExecutor>,
        prober: Arc<HealthProber>,
        health_timeout: Duration,
    ) -> Self {
        Self {
            catalog,
            log,
            executor,
            prober,
            health_timeout,
        }
    }

    /// Rolls back one service, or every service in reverse dependency order
    ///
    /// The caller must hold the environment's lease.
    pub async fn rollback(
        &self,
        environment: Environment,
        service: Option<Service>,
        trigger: RollbackTrigger,
    ) -> Result<RollbackReport, RollbackError> {
        let started_at = Utc::now();
        let services = match service {
            Some(service) if self.catalog.contains(service) => vec![service],
            Some(service) => return Err(RollbackError::UnknownService(service)),
            None => self.catalog.rollback_order(),
        };

        info!(
            "Rolling back {} in {} ({:?})",
            services
                .iter()
                .map(|s| s.as_str())
                .collect::<Vec<_>>()
                .join(", "),
            environment,
            trigger
        );

        let run_records = match trigger {
            RollbackTrigger::Run { run_id } => Some(self.releases_of_run(run_id).await?),
            RollbackTrigger::Operator => None,
        };

        let mut plans = Vec::with_capacity(services.len());
        for service in services {
            let history = self.log.history(environment, service).await?;
            let plan = match &run_records {
                Some(records) => plan_for_run(&history, records, service),
                None => plan_for_operator(&history),
            };
            plans.push((service, plan));
        }

        let run_id = match trigger {
            RollbackTrigger::Run { run_id } => Some(run_id),
            RollbackTrigger::Operator => None,
        };

        let mut outcomes = Vec::with_capacity(plans.len());
        let mut halted = false;
        for (service, plan) in plans {
            let outcome = match plan {
                Plan::Skip => ServiceRollbackOutcome::Skipped,
                Plan::NoPriorRecord => {
                    warn!("No earlier successful deployment of {} in {}", service, environment);
                    ServiceRollbackOutcome::NoPriorRecord
                }
                Plan::Revert { .. } if halted => ServiceRollbackOutcome::Halted,
                Plan::Revert { from, to } => {
                    let outcome = self.revert(environment, service, from, to, run_id).await;
                    halted = outcome.is_failure();
                    outcome
                }
            };
            outcomes.push(ServiceRollback { service, outcome });
        }

        let status = if outcomes.iter().any(|s| s.outcome.is_failure()) {
            error!(
                "Rollback in {} did not complete; manual intervention required",
                environment
            );
            RollbackStatus::Failed
        } else {
            info!("Rollback in {} completed", environment);
            RollbackStatus::Completed
        };

        Ok(RollbackReport {
            environment,
            trigger,
            status,
            services: outcomes,
            started_at,
            completed_at: Utc::now(),
        })
    }

    async fn releases_of_run(&self, run_id: Uuid) -> Result<Vec<DeploymentRecord>, StoreError> {
        let records = self.log.records_for_run(run_id).await?;
        Ok(records
            .into_iter()
            .filter(|r| r.purpose == DeploymentPurpose::Release)
            .collect())
    }

    async fn revert(
        &self,
        environment: Environment,
        service: Service,
        from: ImageReference,
        to: ImageReference,
        run_id: Option<Uuid>,
    ) -> ServiceRollbackOutcome {
        info!("Reverting {} in {} from {} to {}", service, environment, from.tag, to.tag);

        let context = DeployContext::rollback(run_id);
        match self.executor.deploy(environment, service, &to, &context).await {
            Ok(result) if result.is_success() => {
                if self
                    .prober
                    .wait_healthy(environment, service, self.health_timeout)
                    .await
                {
                    ServiceRollbackOutcome::Reverted { from, to }
                } else {
                    error!("{} in {} unhealthy after rollback to {}", service, environment, to);
                    ServiceRollbackOutcome::HealthCheckFailed { to }
                }
            }
            Ok(result) => ServiceRollbackOutcome::DeployFailed {
                reason: result.reason().unwrap_or_default(),
                to,
            },
            Err(e) => ServiceRollbackOutcome::DeployFailed {
                reason: e.to_string(),
                to,
            },
        }
    }
}

// ===== Targeting ===== //

/// Operator rollback: revert the latest record to the successful one before it
fn plan_for_operator(history: &[DeploymentRecord]) -> Plan {
    match history.split_last() {
        Some((current, earlier)) => plan_from(current, earlier),
        None => Plan::NoPriorRecord,
    }
}

/// Automatic rollback: undo what the run deployed; untouched services are skipped
fn plan_for_run(
    history: &[DeploymentRecord],
    run_records: &[DeploymentRecord],
    service: Service,
) -> Plan {
    let Some(first) = run_records.iter().find(|r| r.service == service) else {
        return Plan::Skip;
    };
    match history.iter().position(|r| r.id == first.id) {
        Some(index) => plan_from(&history[index], &history[..index]),
        None => Plan::Skip,
    }
}

/// Target is the latest earlier success with a different image that no
/// rollback has since moved away from
fn plan_from(current: &DeploymentRecord, earlier: &[DeploymentRecord]) -> Plan {
    let abandoned = abandoned_tags(earlier.iter().chain(std::iter::once(current)));
    earlier
        .iter()
        .rev()
        .find(|r| {
            r.is_success()
                && r.image.tag != current.image.tag
                && !abandoned.contains(r.image.tag.as_str())
        })
        .map(|target| Plan::Revert {
            from: current.image.clone(),
            to: target.image.clone(),
        })
        .unwrap_or(Plan::NoPriorRecord)
}

/// Tags that were running when a rollback record replaced them
fn abandoned_tags<'a>(
    history: impl Iterator<Item = &'a DeploymentRecord>,
) -> HashSet<&'a str> {
    let mut abandoned = HashSet::new();
    let mut previous: Option<&DeploymentRecord> = None;
    for record in history {
        if let Some(replaced) = previous {
            if record.purpose == DeploymentPurpose::Rollback
                && replaced.image.tag != record.image.tag
            {
                abandoned.insert(replaced.image.tag.as_str());
            }
        }
        previous = Some(record);
    }
    abandoned
}
