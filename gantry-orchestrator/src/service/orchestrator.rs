//! Pipeline Orchestrator
//!
//! Drives one pipeline run end to end: waits for the environment lease,
//! gates production on approval, then builds, deploys, discovers and
//! health-checks every service in dependency order. A failed production
//! run that changed the cluster is rolled back automatically.

use chrono::Utc;
use gantry_core::domain::environment::Environment;
use gantry_core::domain::failure::{FailureKind, StageFailure, Step};
use gantry_core::domain::record::DeploymentRecord;
use gantry_core::domain::revision::Revision;
use gantry_core::domain::rollback::{RollbackReport, RollbackStatus, RollbackTrigger};
use gantry_core::domain::run::{PipelineRun, RunStatus, StageResult, StageStatus};
use gantry_core::domain::service::{Service, ServiceCatalog};
use gantry_core::dto::run::TriggerRun;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::collaborator::{ApprovalGate, Collaborators};
use crate::config::Config;
use crate::repository::{DeploymentLog, RunStore, StoreError};
use crate::service::builder::ArtifactBuilder;
use crate::service::deployer::{DeployContext, DeploymentExecutor};
use crate::service::discovery::{ResolveError, ServiceDiscoveryResolver};
use crate::service::health::HealthProber;
use crate::service::lease::EnvironmentLeases;
use crate::service::poll::Deadline;
use crate::service::rollback::{RollbackController, RollbackError};
use crate::service::run_config::RunConfig;

#[derive(Debug, Error)]
pub enum TriggerError {
    #[error("branch '{branch}' may not be deployed to {environment}")]
    BranchNotAllowed {
        environment: Environment,
        branch: String,
    },

    #[error("invalid revision: {0}")]
    InvalidRevision(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, Error)]
pub enum CancelError {
    #[error("run {0} not found")]
    NotFound(Uuid),

    #[error("run {id} already finished ({status})")]
    AlreadyFinished { id: Uuid, status: RunStatus },

    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, Error)]
pub enum OperatorRollbackError {
    #[error("a pipeline run is active in {0}; cancel it before rolling back")]
    EnvironmentBusy(Environment),

    #[error(transparent)]
    Rollback(#[from] RollbackError),
}

enum Approval {
    Granted,
    TimedOut,
    Cancelled,
}

pub struct Orchestrator {
    catalog: Arc<ServiceCatalog>,
    builder: ArtifactBuilder,
    executor: Arc<DeploymentExecutor>,
    discovery: ServiceDiscoveryResolver,
    prober: Arc<HealthProber>,
    rollbacks: RollbackController,
    approvals: Arc<dyn ApprovalGate>,
    records: Arc<dyn DeploymentLog>,
    runs: Arc<dyn RunStore>,
    leases: EnvironmentLeases,
    cancellations: RwLock<HashMap<Uuid, Arc<AtomicBool>>>,
    health_timeout: Duration,
    approval_timeout: Duration,
    approval_poll_interval: Duration,
}

impl Orchestrator {
    /// Wires the engine
    pub async fn new(
        config: &Config,
        catalog: ServiceCatalog,
        collaborators: Collaborators,
        records: Arc<dyn DeploymentLog>,
        runs: Arc<dyn RunStore>,
    ) -> Result<Self, StoreError> {
        let catalog = Arc::new(catalog);
        if let Some(last_run) = records.max_run_number().await? {
            info!("Last recorded deployment belongs to run #{}", last_run);
        }

        let executor = Arc::new(DeploymentExecutor::new(
            collaborators.cluster,
            records.clone(),
            config.rollout_timeout,
            config.rollout_poll_interval,
            config.record_append_attempts,
        ));
        let prober = Arc::new(HealthProber::new(
            collaborators.health,
            config.health_poll_interval,
        ));

        Ok(Self {
            builder: ArtifactBuilder::new(
                collaborators.builds,
                collaborators.scanner,
                catalog.clone(),
            ),
            discovery: ServiceDiscoveryResolver::new(
                collaborators.addresses,
                catalog.clone(),
                config.address_timeout,
                config.address_poll_interval,
            ),
            rollbacks: RollbackController::new(
                catalog.clone(),
                records.clone(),
                executor.clone(),
                prober.clone(),
                config.health_timeout,
            ),
            catalog,
            executor,
            prober,
            approvals: collaborators.approvals,
            records,
            runs,
            leases: EnvironmentLeases::new(),
            cancellations: RwLock::new(HashMap::new()),
            health_timeout: config.health_timeout,
            approval_timeout: config.approval_timeout,
            approval_poll_interval: config.approval_poll_interval,
        })
    }

    // ===== Runs ===== //

    /// Registers a pending run without starting it
    pub async fn create_run(
        &self,
        environment: Environment,
        revision: Revision,
    ) -> Result<PipelineRun, TriggerError> {
        if !environment.accepts_branch(revision.branch()) {
            return Err(TriggerError::BranchNotAllowed {
                environment,
                branch: revision.branch().to_string(),
            });
        }

        let run_number = self.records.reserve_run_number().await?;
        let run = PipelineRun::new(
            run_number,
            environment,
            revision,
            self.catalog.deploy_order(),
        );
        self.runs.save(&run).await?;
        self.cancellations
            .write()
            .await
            .insert(run.id, Arc::new(AtomicBool::new(false)));

        info!(
            "Run #{} ({}) created for {} in {}",
            run.run_number, run.id, run.revision, environment
        );
        Ok(run)
    }

    /// Runs a pipeline to completion and returns the finished run
    pub async fn run_pipeline(
        &self,
        environment: Environment,
        revision: Revision,
    ) -> Result<PipelineRun, TriggerError> {
        let run = self.create_run(environment, revision).await?;
        Ok(self.execute(run).await?)
    }

    /// Creates a run and executes it in the background
    pub async fn trigger(self: &Arc<Self>, request: TriggerRun) -> Result<PipelineRun, TriggerError> {
        let revision =
            Revision::new(request.commit, request.branch).map_err(TriggerError::InvalidRevision)?;
        let run = self.create_run(request.environment, revision).await?;

        let orchestrator = Arc::clone(self);
        let pending = run.clone();
        tokio::spawn(async move {
            let id = pending.id;
            if let Err(e) = orchestrator.execute(pending).await {
                error!("Run {} could not be persisted: {}", id, e);
            }
        });

        Ok(run)
    }

    /// Executes a created run, holding its environment's lease throughout
    pub async fn execute(&self, mut run: PipelineRun) -> Result<PipelineRun, StoreError> {
        let environment = run.environment;
        let cancel = self.cancel_flag(run.id).await;

        debug!("Run #{} waiting for {}", run.run_number, environment);
        let lease = self.leases.acquire(environment).await;

        run.start();
        self.runs.save(&run).await?;
        info!("Run #{} started in {}", run.run_number, environment);

        let status = self.drive(&mut run, &cancel).await;
        run.finish(status);
        let saved = self.runs.save(&run).await;

        drop(lease);
        self.cancellations.write().await.remove(&run.id);
        self.approvals.forget(run.id).await;

        match &run.failure {
            Some(failure) => warn!("Run #{} finished {}: {}", run.run_number, run.status, failure),
            None => info!("Run #{} finished {}", run.run_number, run.status),
        }
        saved?;
        Ok(run)
    }

    /// Requests cancellation; observed at the next stage boundary
    pub async fn cancel(&self, run_id: Uuid) -> Result<PipelineRun, CancelError> {
        let run = self
            .runs
            .get(run_id)
            .await?
            .ok_or(CancelError::NotFound(run_id))?;

        if run.status.is_terminal() {
            return Err(CancelError::AlreadyFinished {
                id: run_id,
                status: run.status,
            });
        }

        match self.cancellations.read().await.get(&run_id) {
            Some(flag) => flag.store(true, Ordering::SeqCst),
            None => {
                return Err(CancelError::AlreadyFinished {
                    id: run_id,
                    status: run.status,
                });
            }
        }

        info!("Cancellation of run #{} requested", run.run_number);
        Ok(run)
    }

    /// Operator rollback; refused while a run holds the environment
    pub async fn rollback(
        &self,
        environment: Environment,
        service: Option<Service>,
    ) -> Result<RollbackReport, OperatorRollbackError> {
        let _lease = self
            .leases
            .try_acquire(environment)
            .ok_or(OperatorRollbackError::EnvironmentBusy(environment))?;

        Ok(self
            .rollbacks
            .rollback(environment, service, RollbackTrigger::Operator)
            .await?)
    }

    pub async fn get_run(&self, id: Uuid) -> Result<Option<PipelineRun>, StoreError> {
        self.runs.get(id).await
    }

    pub async fn list_runs(
        &self,
        environment: Option<Environment>,
    ) -> Result<Vec<PipelineRun>, StoreError> {
        self.runs.list(environment).await
    }

    pub async fn history(
        &self,
        environment: Environment,
        service: Service,
    ) -> Result<Vec<DeploymentRecord>, StoreError> {
        self.records.history(environment, service).await
    }

    // ===== Execution ===== //

    /// Runs the approval gate and every stage; returns the terminal status
    async fn drive(&self, run: &mut PipelineRun, cancel: &AtomicBool) -> RunStatus {
        let environment = run.environment;

        if environment.requires_approval() {
            match self.await_approval(run.id, cancel).await {
                Approval::Granted => {
                    run.approved_at = Some(Utc::now());
                    self.persist(run).await;
                }
                Approval::TimedOut => {
                    run.failure = Some(StageFailure::approval_timeout(environment));
                    return RunStatus::Failed;
                }
                Approval::Cancelled => {
                    run.failure = Some(StageFailure::cancelled(environment, Step::Approval, None));
                    return RunStatus::Cancelled;
                }
            }
        }

        let mut config = RunConfig::new(environment);
        let order = self.catalog.deploy_order().to_vec();

        // every run takes its own address snapshots
        for service in &order {
            if self.catalog.has_dependants(*service) {
                self.discovery.invalidate(environment, *service).await;
            }
        }

        for service in order {
            if cancel.load(Ordering::SeqCst) {
                run.failure = Some(StageFailure::cancelled(environment, Step::Build, Some(service)));
                return RunStatus::Cancelled;
            }

            match self.run_stage(run, service, &config).await {
                Ok(next) => config = next,
                Err(failure) => {
                    run.failure = Some(failure);
                    return self.recover(run).await;
                }
            }
        }

        RunStatus::Succeeded
    }

    async fn await_approval(&self, run_id: Uuid, cancel: &AtomicBool) -> Approval {
        info!("Run {} waiting for approval", run_id);
        let deadline = Deadline::new(self.approval_timeout, self.approval_poll_interval);

        loop {
            if cancel.load(Ordering::SeqCst) {
                return Approval::Cancelled;
            }

            match self.approvals.is_approved(run_id).await {
                Ok(true) => {
                    info!("Run {} approved", run_id);
                    return Approval::Granted;
                }
                Ok(false) => {}
                Err(e) => warn!("Approval gate unavailable: {}", e),
            }

            if !deadline.wait_next().await {
                return Approval::TimedOut;
            }
        }
    }

    /// Build, deploy, discover and health-check one service
    ///
    /// Returns the configuration later stages build with.
    async fn run_stage(
        &self,
        run: &mut PipelineRun,
        service: Service,
        config: &RunConfig,
    ) -> Result<RunConfig, StageFailure> {
        let environment = run.environment;
        update_stage(run, service, |stage| {
            stage.status = StageStatus::Running;
            stage.started_at = Some(Utc::now());
        });
        self.persist(run).await;

        let outcome = self.stage_steps(run, service, config).await;

        update_stage(run, service, |stage| {
            stage.finished_at = Some(Utc::now());
            match &outcome {
                Ok(_) => stage.status = StageStatus::Succeeded,
                Err(failure) => {
                    stage.status = StageStatus::Failed;
                    stage.failure = Some(failure.clone());
                }
            }
        });
        self.persist(run).await;

        if outcome.is_ok() {
            info!("Stage {} of run #{} in {} succeeded", service, run.run_number, environment);
        }
        outcome
    }

    async fn stage_steps(
        &self,
        run: &mut PipelineRun,
        service: Service,
        config: &RunConfig,
    ) -> Result<RunConfig, StageFailure> {
        let environment = run.environment;

        let image = self
            .builder
            .build(service, &run.revision, run.run_number, config)
            .await
            .map_err(|e| e.into_stage_failure(environment, service))?;
        update_stage(run, service, |stage| stage.image = Some(image.clone()));
        self.persist(run).await;

        let context = DeployContext::release(run.id, run.run_number);
        match self.executor.deploy(environment, service, &image, &context).await {
            Ok(result) => {
                if let Some(failure) = result.failure {
                    return Err(StageFailure::new(
                        environment,
                        service,
                        Step::Deploy,
                        failure.kind(),
                        result.reason().unwrap_or_else(|| failure.to_string()),
                    ));
                }
            }
            Err(e) => {
                // finished-but-unrecorded is as untrustworthy as unknown
                return Err(StageFailure::new(
                    environment,
                    service,
                    Step::Deploy,
                    FailureKind::RolloutUnknown,
                    e.to_string(),
                ));
            }
        }

        let mut next = config.clone();
        if self.catalog.has_dependants(service) {
            let address = self
                .discovery
                .resolve_address(environment, service)
                .await
                .map_err(|e| {
                    let kind = match e {
                        ResolveError::NotExposed { .. } => FailureKind::NotExposed,
                        ResolveError::Timeout { .. } => FailureKind::AddressResolutionTimeout,
                    };
                    StageFailure::new(environment, service, Step::Discover, kind, e.to_string())
                })?;
            update_stage(run, service, |stage| stage.address = Some(address.clone()));
            next = config.with_address(service, address);
        }

        if !self
            .prober
            .wait_healthy(environment, service, self.health_timeout)
            .await
        {
            return Err(StageFailure::new(
                environment,
                service,
                Step::Health,
                FailureKind::HealthCheckFailed,
                format!("not healthy within {:?}", self.health_timeout),
            ));
        }

        Ok(next)
    }

    /// Decides what a failed run ends as, rolling back production when needed
    async fn recover(&self, run: &mut PipelineRun) -> RunStatus {
        let environment = run.environment;
        if !environment.rolls_back_automatically() {
            return RunStatus::Failed;
        }

        match self.records.records_for_run(run.id).await {
            Ok(records) if records.is_empty() => {
                debug!("Run #{} changed nothing; no rollback needed", run.run_number);
                return RunStatus::Failed;
            }
            Ok(_) => {}
            Err(e) => warn!("Could not read records of run #{}: {}", run.run_number, e),
        }

        warn!("Rolling back run #{} in {}", run.run_number, environment);
        match self
            .rollbacks
            .rollback(environment, None, RollbackTrigger::Run { run_id: run.id })
            .await
        {
            Ok(report) => {
                let status = match report.status {
                    RollbackStatus::Completed => RunStatus::RolledBack,
                    RollbackStatus::Failed => RunStatus::RollbackFailed,
                };
                run.rollback = Some(report);
                status
            }
            Err(e) => {
                error!("Rollback of run #{} failed: {}", run.run_number, e);
                RunStatus::RollbackFailed
            }
        }
    }

    // ===== Helper Functions ===== //

    async fn cancel_flag(&self, run_id: Uuid) -> Arc<AtomicBool> {
        self.cancellations
            .write()
            .await
            .entry(run_id)
            .or_insert_with(|| Arc::new(AtomicBool::new(false)))
            .clone()
    }

    /// Saves progress; a failed intermediate save does not stop the run
    async fn persist(&self, run: &PipelineRun) {
        if let Err(e) = self.runs.save(run).await {
            warn!("Could not save progress of run #{}: {}", run.run_number, e);
        }
    }
}

fn update_stage(run: &mut PipelineRun, service: Service, update: impl FnOnce(&mut StageResult)) {
    if let Some(stage) = run.stage_mut(service) {
        update(stage);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborator::ApprovalGate;
    use crate::service::testing::Harness;
    use gantry_core::domain::image::ImageReference;
    use gantry_core::domain::record::{DeploymentOutcome, DeploymentPurpose};
    use gantry_core::domain::rollback::ServiceRollbackOutcome;

    fn main_revision(commit: &str) -> Revision {
        Revision::new(commit, "main").unwrap()
    }

    fn develop_revision(commit: &str) -> Revision {
        Revision::new(commit, "develop").unwrap()
    }

    async fn wait_finished(orchestrator: &Orchestrator, id: Uuid) -> PipelineRun {
        loop {
            let run = orchestrator.get_run(id).await.unwrap().unwrap();
            if run.status.is_terminal() {
                return run;
            }
            tokio::time::sleep(Duration::from_secs(1)).await;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_staging_run_deploys_in_dependency_order() {
        let h = Harness::new().await;
        let orchestrator = h.orchestrator().await;

        let run = orchestrator
            .run_pipeline(Environment::Staging, develop_revision("1111111aaaaaaa"))
            .await
            .unwrap();

        assert_eq!(run.status, RunStatus::Succeeded);
        assert!(run.approved_at.is_none());
        assert!(run.stages.iter().all(|s| s.status == StageStatus::Succeeded));

        let applied: Vec<_> = h
            .cluster
            .applied_in(Environment::Staging)
            .await
            .into_iter()
            .map(|i| i.service)
            .collect();
        assert_eq!(applied, vec![Service::BackendApi, Service::Frontend]);

        let frontend_build = &h.builds.requests().await[1];
        assert_eq!(frontend_build.build_args["BACKEND_API_URL"], "http://10.0.0.7");
        assert_eq!(
            run.stage(Service::BackendApi).unwrap().address.as_ref().unwrap().host(),
            "10.0.0.7"
        );
        assert_eq!(h.records.records_for_run(run.id).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_branch_policy_is_enforced() {
        let h = Harness::new().await;
        let orchestrator = h.orchestrator().await;

        let error = orchestrator
            .create_run(Environment::Production, develop_revision("2222222bbbbbbb"))
            .await
            .unwrap_err();
        assert!(matches!(error, TriggerError::BranchNotAllowed { .. }));

        let error = orchestrator
            .create_run(
                Environment::Staging,
                Revision::new("2222222bbbbbbb", "feature/cart").unwrap(),
            )
            .await
            .unwrap_err();
        assert!(matches!(error, TriggerError::BranchNotAllowed { .. }));
        assert!(orchestrator.list_runs(None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_run_numbers_continue_after_recorded_runs() {
        let h = Harness::new().await;
        h.seed_release(
            Environment::Production,
            Service::BackendApi,
            &main_revision("3333333ccccccc"),
            41,
        )
        .await;
        let orchestrator = h.orchestrator().await;

        let run = orchestrator
            .create_run(Environment::Staging, develop_revision("3333333ccccccc"))
            .await
            .unwrap();
        assert_eq!(run.run_number, 42);
        assert_eq!(run.status, RunStatus::Pending);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_numbers_are_not_reused_after_a_restart() {
        let h = Harness::new().await;
        h.builds.fail(Service::BackendApi).await;
        let orchestrator = h.orchestrator().await;

        let failed = orchestrator
            .run_pipeline(Environment::Staging, develop_revision("3434343ccccccc"))
            .await
            .unwrap();
        assert_eq!(failed.status, RunStatus::Failed);
        assert!(h.records.all().await.is_empty());

        let restarted = h.orchestrator().await;
        let run = restarted
            .create_run(Environment::Staging, develop_revision("3434343ccccccc"))
            .await
            .unwrap();
        assert!(run.run_number > failed.run_number);
    }

    #[tokio::test(start_paused = true)]
    async fn test_runs_are_exclusive_per_environment() {
        let h = Harness::new().await;
        h.cluster.ready_after(Service::BackendApi, 3).await;
        let orchestrator = h.orchestrator().await;

        let trigger = |environment, branch: &str, commit: &str| TriggerRun {
            environment,
            commit: commit.to_string(),
            branch: branch.to_string(),
        };
        let first = orchestrator
            .trigger(trigger(Environment::Staging, "develop", "aaaaaaa1111111"))
            .await
            .unwrap();
        let second = orchestrator
            .trigger(trigger(Environment::Staging, "develop", "bbbbbbb2222222"))
            .await
            .unwrap();
        let production = orchestrator
            .trigger(trigger(Environment::Production, "main", "ccccccc3333333"))
            .await
            .unwrap();
        h.approvals.approve(production.id).await;

        tokio::time::sleep(Duration::from_secs(1)).await;
        let staging = orchestrator.list_runs(Some(Environment::Staging)).await.unwrap();
        let running = staging.iter().filter(|r| r.status == RunStatus::Running).count();
        let pending = staging.iter().filter(|r| r.status == RunStatus::Pending).count();
        assert_eq!((running, pending), (1, 1));

        let first = wait_finished(&orchestrator, first.id).await;
        let second = wait_finished(&orchestrator, second.id).await;
        let production = wait_finished(&orchestrator, production.id).await;
        assert_eq!(first.status, RunStatus::Succeeded);
        assert_eq!(second.status, RunStatus::Succeeded);
        assert_eq!(production.status, RunStatus::Succeeded);

        // no interleaving within staging
        let staging_applies: Vec<_> = h
            .cluster
            .applied_in(Environment::Staging)
            .await
            .into_iter()
            .map(|i| i.tag)
            .collect();
        let first_tag = |service| {
            ImageReference::for_run(service, Environment::Staging, &first.revision, first.run_number).tag
        };
        let second_tag = |service| {
            ImageReference::for_run(service, Environment::Staging, &second.revision, second.run_number).tag
        };
        let expected_first = vec![
            first_tag(Service::BackendApi),
            first_tag(Service::Frontend),
            second_tag(Service::BackendApi),
            second_tag(Service::Frontend),
        ];
        let expected_second = vec![
            second_tag(Service::BackendApi),
            second_tag(Service::Frontend),
            first_tag(Service::BackendApi),
            first_tag(Service::Frontend),
        ];
        assert!(staging_applies == expected_first || staging_applies == expected_second);

        // production did not wait for staging
        let applied = h.cluster.applied().await;
        let production_start = applied
            .iter()
            .find(|a| a.image.environment == Environment::Production)
            .map(|a| a.at)
            .unwrap();
        let last_staging = applied
            .iter()
            .filter(|a| a.image.environment == Environment::Staging)
            .map(|a| a.at)
            .max()
            .unwrap();
        assert!(production_start < last_staging);
    }

    #[tokio::test(start_paused = true)]
    async fn test_production_health_failure_rolls_back() {
        let h = Harness::new().await;
        let r1 = main_revision("1010101abababab");
        let backend_r1 = h
            .seed_release(Environment::Production, Service::BackendApi, &r1, 1)
            .await;
        h.seed_release(Environment::Production, Service::Frontend, &r1, 1)
            .await;
        let orchestrator = h.orchestrator().await;

        let r2 = main_revision("2020202cdcdcdcd");
        let run = orchestrator
            .create_run(Environment::Production, r2.clone())
            .await
            .unwrap();
        let bad_backend =
            ImageReference::for_run(Service::BackendApi, Environment::Production, &r2, run.run_number);
        h.health
            .unhealthy_image(Service::BackendApi, &bad_backend.tag)
            .await;
        h.approvals.approve(run.id).await;

        let run = orchestrator.execute(run).await.unwrap();

        assert_eq!(run.status, RunStatus::RolledBack);
        let failure = run.failure.as_ref().unwrap();
        assert_eq!(failure.kind, FailureKind::HealthCheckFailed);
        assert_eq!(failure.service, Some(Service::BackendApi));
        assert_eq!(
            run.stage(Service::Frontend).unwrap().status,
            StageStatus::NotAttempted
        );

        let release = h.records.records_for_run(run.id).await.unwrap();
        assert_eq!(release[0].service, Service::BackendApi);
        assert_eq!(release[0].outcome, DeploymentOutcome::Succeeded);
        assert!(release.iter().all(|r| r.service == Service::BackendApi));

        let report = run.rollback.as_ref().unwrap();
        let order: Vec<_> = report.services.iter().map(|s| s.service).collect();
        assert_eq!(order, vec![Service::Frontend, Service::BackendApi]);
        assert_eq!(report.outcome(Service::Frontend), Some(&ServiceRollbackOutcome::Skipped));
        assert!(matches!(
            report.outcome(Service::BackendApi),
            Some(ServiceRollbackOutcome::Reverted { to, .. }) if to == &backend_r1.image
        ));
        assert_eq!(
            h.cluster.deployed(Environment::Production, Service::BackendApi).await,
            Some(backend_r1.image)
        );
        assert_eq!(release.last().unwrap().purpose, DeploymentPurpose::Rollback);
        assert!(!h.approvals.is_approved(run.id).await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_operator_rollback_never_restores_an_image_rolled_back_from() {
        let h = Harness::new().await;
        let r1 = main_revision("1010101abababab");
        let backend_r1 = h
            .seed_release(Environment::Production, Service::BackendApi, &r1, 1)
            .await;
        h.seed_release(Environment::Production, Service::Frontend, &r1, 1)
            .await;
        let orchestrator = h.orchestrator().await;

        let r2 = main_revision("2020202cdcdcdcd");
        let run = orchestrator
            .create_run(Environment::Production, r2.clone())
            .await
            .unwrap();
        let bad_backend =
            ImageReference::for_run(Service::BackendApi, Environment::Production, &r2, run.run_number);
        h.health
            .unhealthy_image(Service::BackendApi, &bad_backend.tag)
            .await;
        h.approvals.approve(run.id).await;
        let run = orchestrator.execute(run).await.unwrap();
        assert_eq!(run.status, RunStatus::RolledBack);

        let report = orchestrator
            .rollback(Environment::Production, Some(Service::BackendApi))
            .await
            .unwrap();

        assert_eq!(
            report.outcome(Service::BackendApi),
            Some(&ServiceRollbackOutcome::NoPriorRecord)
        );
        assert_eq!(
            h.cluster.deployed(Environment::Production, Service::BackendApi).await,
            Some(backend_r1.image)
        );
        let applied = h.cluster.applied_in(Environment::Production).await;
        assert_eq!(applied.iter().filter(|i| **i == bad_backend).count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_rollback_needs_intervention() {
        let h = Harness::new().await;
        let orchestrator = h.orchestrator().await;

        // first production deployment ever: nothing to return to
        let revision = main_revision("3030303efefefef");
        let run = orchestrator
            .create_run(Environment::Production, revision.clone())
            .await
            .unwrap();
        let frontend =
            ImageReference::for_run(Service::Frontend, Environment::Production, &revision, run.run_number);
        h.health.unhealthy_image(Service::Frontend, &frontend.tag).await;
        h.approvals.approve(run.id).await;

        let run = orchestrator.execute(run).await.unwrap();

        assert_eq!(run.status, RunStatus::RollbackFailed);
        let report = run.rollback.unwrap();
        assert_eq!(
            report.outcome(Service::Frontend),
            Some(&ServiceRollbackOutcome::NoPriorRecord)
        );
        assert_eq!(h.cluster.applied().await.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_approval_timeout_fails_without_deploying() {
        let h = Harness::new().await;
        let orchestrator = h.orchestrator().await;

        let started = tokio::time::Instant::now();
        let run = orchestrator
            .run_pipeline(Environment::Production, main_revision("4040404abcdef0"))
            .await
            .unwrap();

        assert_eq!(run.status, RunStatus::Failed);
        let failure = run.failure.unwrap();
        assert_eq!(failure.kind, FailureKind::ApprovalTimeout);
        assert_eq!(failure.reason, "approval timeout");
        assert_eq!(started.elapsed(), Duration::from_secs(30 * 60));
        assert!(h.builds.requests().await.is_empty());
        assert!(h.cluster.applied().await.is_empty());
        assert!(h.records.all().await.is_empty());
        assert!(run.rollback.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_address_timeout_stops_before_frontend() {
        let h = Harness::new().await;
        h.addresses
            .assign_after(Environment::Staging, Service::BackendApi, "10.0.0.7", u32::MAX)
            .await;
        let orchestrator = h.orchestrator().await;

        let run = orchestrator
            .run_pipeline(Environment::Staging, develop_revision("5050505abcdef0"))
            .await
            .unwrap();

        assert_eq!(run.status, RunStatus::Failed);
        let failure = run.failure.as_ref().unwrap();
        assert_eq!(failure.kind, FailureKind::AddressResolutionTimeout);
        assert_eq!(failure.step, Step::Discover);
        assert_eq!(
            run.stage(Service::Frontend).unwrap().status,
            StageStatus::NotAttempted
        );

        let records = h.records.all().await;
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].service, Service::BackendApi);
        assert!(run.rollback.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_staging_failure_is_not_rolled_back() {
        let h = Harness::new().await;
        h.cluster.reject(Service::Frontend, "invalid manifest").await;
        let orchestrator = h.orchestrator().await;

        let run = orchestrator
            .run_pipeline(Environment::Staging, develop_revision("6060606abcdef0"))
            .await
            .unwrap();

        assert_eq!(run.status, RunStatus::Failed);
        let failure = run.failure.unwrap();
        assert_eq!(failure.kind, FailureKind::RolloutRejected);
        assert_eq!(failure.reason, "rejected: invalid manifest");
        assert!(run.rollback.is_none());
        assert_eq!(h.records.all().await.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_mid_deploy_records_then_stops() {
        let h = Harness::new().await;
        h.cluster.ready_after(Service::BackendApi, 2).await;
        let orchestrator = h.orchestrator().await;

        let run = orchestrator
            .trigger(TriggerRun {
                environment: Environment::Staging,
                commit: "7070707abcdef0".to_string(),
                branch: "develop".to_string(),
            })
            .await
            .unwrap();

        // backend rollout is pending at this point
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(h.cluster.applied().await.len(), 1);
        orchestrator.cancel(run.id).await.unwrap();

        let run = wait_finished(&orchestrator, run.id).await;
        assert_eq!(run.status, RunStatus::Cancelled);
        assert_eq!(run.failure.as_ref().unwrap().kind, FailureKind::Cancelled);
        assert_eq!(
            run.stage(Service::BackendApi).unwrap().status,
            StageStatus::Succeeded
        );
        assert_eq!(
            run.stage(Service::Frontend).unwrap().status,
            StageStatus::NotAttempted
        );
        assert_eq!(h.records.all().await.len(), 1);

        let error = orchestrator.cancel(run.id).await.unwrap_err();
        assert!(matches!(error, CancelError::AlreadyFinished { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_while_awaiting_approval() {
        let h = Harness::new().await;
        let orchestrator = h.orchestrator().await;

        let run = orchestrator
            .trigger(TriggerRun {
                environment: Environment::Production,
                commit: "8080808abcdef0".to_string(),
                branch: "main".to_string(),
            })
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_secs(1)).await;
        orchestrator.cancel(run.id).await.unwrap();

        let run = wait_finished(&orchestrator, run.id).await;
        assert_eq!(run.status, RunStatus::Cancelled);
        assert_eq!(run.failure.unwrap().step, Step::Approval);
        assert!(h.records.all().await.is_empty());
    }

    #[tokio::test]
    async fn test_cancel_unknown_run() {
        let h = Harness::new().await;
        let orchestrator = h.orchestrator().await;

        let error = orchestrator.cancel(Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(error, CancelError::NotFound(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_operator_rollback_is_refused_during_a_run() {
        let h = Harness::new().await;
        let orchestrator = h.orchestrator().await;

        let run = orchestrator
            .trigger(TriggerRun {
                environment: Environment::Production,
                commit: "9090909abcdef0".to_string(),
                branch: "main".to_string(),
            })
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_secs(1)).await;

        let error = orchestrator
            .rollback(Environment::Production, None)
            .await
            .unwrap_err();
        assert!(matches!(error, OperatorRollbackError::EnvironmentBusy(Environment::Production)));

        // staging is unaffected
        let report = orchestrator
            .rollback(Environment::Staging, Some(Service::BackendApi))
            .await
            .unwrap();
        assert_eq!(report.status, RollbackStatus::Failed);
        assert_eq!(
            report.outcome(Service::BackendApi),
            Some(&ServiceRollbackOutcome::NoPriorRecord)
        );

        orchestrator.cancel(run.id).await.unwrap();
        wait_finished(&orchestrator, run.id).await;
    }
}
