//! In-memory collaborators for engine tests

use async_trait::async_trait;
use chrono::Utc;
use gantry_core::domain::address::Address;
use gantry_core::domain::environment::Environment;
use gantry_core::domain::image::ImageReference;
use gantry_core::domain::record::{DeploymentOutcome, DeploymentPurpose, DeploymentRecord};
use gantry_core::domain::revision::Revision;
use gantry_core::domain::service::{Service, ServiceCatalog};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use uuid::Uuid;

use crate::collaborator::{
    AddressProvider, ApplyResponse, BuildError, BuildRequest, BuildService, ClusterControlPlane,
    CollaboratorError, Collaborators, HealthEndpoint, LocalApprovalGate, RolloutStatus, ScanReport,
    VulnerabilityScanner,
};
use crate::config::Config;
use crate::repository::{DeploymentLog, InMemoryDeploymentLog, InMemoryRunStore, StoreError};
use crate::service::orchestrator::Orchestrator;

pub fn image(service: Service, environment: Environment, label: &str) -> ImageReference {
    ImageReference {
        service,
        environment,
        tag: format!("{}-{}", environment, label),
    }
}

fn unavailable(collaborator: &'static str) -> CollaboratorError {
    CollaboratorError::Unavailable {
        collaborator,
        message: "connection refused".to_string(),
    }
}

// ===== Build service ===== //

#[derive(Default)]
pub struct FakeBuilds {
    requests: Mutex<Vec<BuildRequest>>,
    failing: Mutex<HashSet<Service>>,
}

impl FakeBuilds {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn fail(&self, service: Service) {
        self.failing.lock().await.insert(service);
    }

    pub async fn requests(&self) -> Vec<BuildRequest> {
        self.requests.lock().await.clone()
    }
}

#[async_trait]
impl BuildService for FakeBuilds {
    async fn build(&self, request: &BuildRequest) -> Result<ImageReference, BuildError> {
        self.requests.lock().await.push(request.clone());
        if self.failing.lock().await.contains(&request.image.service) {
            return Err(BuildError::Failed {
                image: request.image.clone(),
                reason: "unit tests failed".to_string(),
            });
        }
        Ok(request.image.clone())
    }
}

// ===== Scanner ===== //

#[derive(Default)]
pub struct FakeScanner {
    findings: Mutex<Vec<String>>,
}

impl FakeScanner {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn fail_with(&self, findings: Vec<String>) {
        *self.findings.lock().await = findings;
    }
}

#[async_trait]
impl VulnerabilityScanner for FakeScanner {
    async fn scan(&self, _image: &ImageReference) -> Result<ScanReport, CollaboratorError> {
        let findings = self.findings.lock().await.clone();
        Ok(ScanReport {
            passed: findings.is_empty(),
            findings,
        })
    }
}

// ===== Cluster control plane ===== //

#[derive(Debug, Clone)]
enum Rollout {
    ReadyAfter(u32),
    NeverReady,
    Fail,
    Reject(String),
    UnreachableStatus,
}

#[derive(Debug, Clone)]
pub struct AppliedImage {
    pub image: ImageReference,
    pub at: Instant,
}

#[derive(Default)]
struct ClusterState {
    behaviours: HashMap<Service, Rollout>,
    pending_left: HashMap<(Environment, Service), u32>,
    deployed: HashMap<(Environment, Service), ImageReference>,
    applied: Vec<AppliedImage>,
    status_polls: u32,
}

#[derive(Default)]
pub struct FakeCluster {
    state: Mutex<ClusterState>,
}

impl FakeCluster {
    pub fn new() -> Self {
        Self::default()
    }

    async fn set(&self, service: Service, rollout: Rollout) {
        self.state.lock().await.behaviours.insert(service, rollout);
    }

    /// Reports `pending` this many times after every apply, then `ready`
    pub async fn ready_after(&self, service: Service, pending: u32) {
        self.set(service, Rollout::ReadyAfter(pending)).await;
    }

    pub async fn never_ready(&self, service: Service) {
        self.set(service, Rollout::NeverReady).await;
    }

    pub async fn fail_rollout(&self, service: Service) {
        self.set(service, Rollout::Fail).await;
    }

    pub async fn reject(&self, service: Service, reason: &str) {
        self.set(service, Rollout::Reject(reason.to_string())).await;
    }

    pub async fn unreachable_status(&self, service: Service) {
        self.set(service, Rollout::UnreachableStatus).await;
    }

    /// Every accepted apply, in order
    pub async fn applied(&self) -> Vec<AppliedImage> {
        self.state.lock().await.applied.clone()
    }

    pub async fn applied_in(&self, environment: Environment) -> Vec<ImageReference> {
        self.applied()
            .await
            .into_iter()
            .filter(|a| a.image.environment == environment)
            .map(|a| a.image)
            .collect()
    }

    pub async fn deployed(&self, environment: Environment, service: Service) -> Option<ImageReference> {
        self.state
            .lock()
            .await
            .deployed
            .get(&(environment, service))
            .cloned()
    }

    pub async fn status_polls(&self) -> u32 {
        self.state.lock().await.status_polls
    }
}

#[async_trait]
impl ClusterControlPlane for FakeCluster {
    async fn apply_deployment(
        &self,
        environment: Environment,
        service: Service,
        image: &ImageReference,
    ) -> Result<ApplyResponse, CollaboratorError> {
        let mut state = self.state.lock().await;
        let behaviour = state
            .behaviours
            .get(&service)
            .cloned()
            .unwrap_or(Rollout::ReadyAfter(0));

        if let Rollout::Reject(reason) = &behaviour {
            return Ok(ApplyResponse::Rejected {
                reason: reason.clone(),
            });
        }

        let pending = match behaviour {
            Rollout::ReadyAfter(n) => n,
            _ => 0,
        };
        state.pending_left.insert((environment, service), pending);
        state.deployed.insert((environment, service), image.clone());
        state.applied.push(AppliedImage {
            image: image.clone(),
            at: Instant::now(),
        });
        Ok(ApplyResponse::Accepted)
    }

    async fn rollout_status(
        &self,
        environment: Environment,
        service: Service,
        _image: &ImageReference,
    ) -> Result<RolloutStatus, CollaboratorError> {
        let mut state = self.state.lock().await;
        state.status_polls += 1;
        let behaviour = state
            .behaviours
            .get(&service)
            .cloned()
            .unwrap_or(Rollout::ReadyAfter(0));

        match behaviour {
            Rollout::NeverReady => Ok(RolloutStatus::Pending),
            Rollout::Fail => Ok(RolloutStatus::Failed),
            Rollout::UnreachableStatus => Err(unavailable("cluster")),
            Rollout::Reject(_) => Err(CollaboratorError::Protocol {
                collaborator: "cluster",
                message: "no rollout for a rejected apply".to_string(),
            }),
            Rollout::ReadyAfter(_) => {
                let left = state.pending_left.entry((environment, service)).or_insert(0);
                if *left == 0 {
                    Ok(RolloutStatus::Ready)
                } else {
                    *left -= 1;
                    Ok(RolloutStatus::Pending)
                }
            }
        }
    }
}

// ===== Address provider ===== //

#[derive(Default)]
struct AddressState {
    assigned: HashMap<(Environment, Service), (String, u32)>,
    lookups: u32,
}

#[derive(Default)]
pub struct FakeAddresses {
    state: Mutex<AddressState>,
}

impl FakeAddresses {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answers `None` for `lookups_before` lookups, then `host`
    pub async fn assign_after(
        &self,
        environment: Environment,
        service: Service,
        host: &str,
        lookups_before: u32,
    ) {
        self.state
            .lock()
            .await
            .assigned
            .insert((environment, service), (host.to_string(), lookups_before));
    }

    pub async fn lookups(&self) -> u32 {
        self.state.lock().await.lookups
    }
}

#[async_trait]
impl AddressProvider for FakeAddresses {
    async fn external_address(
        &self,
        environment: Environment,
        service: Service,
    ) -> Result<Option<Address>, CollaboratorError> {
        let mut state = self.state.lock().await;
        state.lookups += 1;
        match state.assigned.get_mut(&(environment, service)) {
            Some((_, before)) if *before > 0 => {
                *before -= 1;
                Ok(None)
            }
            Some((host, _)) => Ok(Some(Address::new(host.clone()))),
            None => Ok(None),
        }
    }
}

// ===== Health endpoint ===== //

#[derive(Default)]
struct HealthState {
    unhealthy: HashSet<(Environment, Service)>,
    unhealthy_images: HashSet<(Service, String)>,
    failing_probes: HashMap<Service, u32>,
    probes: HashMap<Service, u32>,
}

#[derive(Default)]
pub struct FakeHealth {
    state: Mutex<HealthState>,
    cluster: Option<Arc<FakeCluster>>,
}

impl FakeHealth {
    pub fn new() -> Self {
        Self::default()
    }

    /// Health that depends on which image the cluster is currently running
    pub fn linked(cluster: Arc<FakeCluster>) -> Self {
        Self {
            state: Mutex::default(),
            cluster: Some(cluster),
        }
    }

    pub async fn set_unhealthy(&self, environment: Environment, service: Service) {
        self.state.lock().await.unhealthy.insert((environment, service));
    }

    /// The service reports unhealthy while running this image tag
    pub async fn unhealthy_image(&self, service: Service, tag: &str) {
        self.state
            .lock()
            .await
            .unhealthy_images
            .insert((service, tag.to_string()));
    }

    /// The next `count` probes of the service error out
    pub async fn fail_probes(&self, service: Service, count: u32) {
        self.state.lock().await.failing_probes.insert(service, count);
    }

    pub async fn probes(&self, service: Service) -> u32 {
        self.state
            .lock()
            .await
            .probes
            .get(&service)
            .copied()
            .unwrap_or(0)
    }
}

#[async_trait]
impl HealthEndpoint for FakeHealth {
    async fn is_healthy(
        &self,
        environment: Environment,
        service: Service,
    ) -> Result<bool, CollaboratorError> {
        let running = match &self.cluster {
            Some(cluster) => cluster.deployed(environment, service).await,
            None => None,
        };

        let mut state = self.state.lock().await;
        *state.probes.entry(service).or_insert(0) += 1;

        if let Some(left) = state.failing_probes.get_mut(&service) {
            if *left > 0 {
                *left -= 1;
                return Err(unavailable("health"));
            }
        }

        if state.unhealthy.contains(&(environment, service)) {
            return Ok(false);
        }
        Ok(running.is_none_or(|image| {
            !state.unhealthy_images.contains(&(service, image.tag))
        }))
    }
}

// ===== Deployment log ===== //

/// Log whose first appends store the record but report a failure,
/// like a database that commits and then drops the connection
pub struct FlakyLog {
    inner: Arc<InMemoryDeploymentLog>,
    failures_left: AtomicU32,
    attempts: AtomicU32,
}

impl FlakyLog {
    pub fn new(inner: Arc<InMemoryDeploymentLog>, failures: u32) -> Self {
        Self {
            inner,
            failures_left: AtomicU32::new(failures),
            attempts: AtomicU32::new(0),
        }
    }

    pub fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DeploymentLog for FlakyLog {
    async fn append(&self, record: &DeploymentRecord) -> Result<bool, StoreError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        let inserted = self.inner.append(record).await?;
        let failing = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(StoreError::Unavailable("connection reset".to_string()));
        }
        Ok(inserted)
    }

    async fn history(
        &self,
        environment: Environment,
        service: Service,
    ) -> Result<Vec<DeploymentRecord>, StoreError> {
        self.inner.history(environment, service).await
    }

    async fn records_for_run(&self, run_id: Uuid) -> Result<Vec<DeploymentRecord>, StoreError> {
        self.inner.records_for_run(run_id).await
    }

    async fn max_run_number(&self) -> Result<Option<u64>, StoreError> {
        self.inner.max_run_number().await
    }

    async fn reserve_run_number(&self) -> Result<u64, StoreError> {
        self.inner.reserve_run_number().await
    }
}

// ===== Whole engine ===== //

/// Every fake wired together, healthy by default
pub struct Harness {
    pub builds: Arc<FakeBuilds>,
    pub scanner: Arc<FakeScanner>,
    pub cluster: Arc<FakeCluster>,
    pub addresses: Arc<FakeAddresses>,
    pub health: Arc<FakeHealth>,
    pub approvals: Arc<LocalApprovalGate>,
    pub records: Arc<InMemoryDeploymentLog>,
    pub runs: Arc<InMemoryRunStore>,
    pub config: Config,
}

impl Harness {
    pub async fn new() -> Self {
        let cluster = Arc::new(FakeCluster::new());
        let addresses = Arc::new(FakeAddresses::new());
        for environment in Environment::ALL {
            addresses
                .assign_after(environment, Service::BackendApi, "10.0.0.7", 0)
                .await;
        }

        let mut config = Config::new("http://platform.test".to_string());
        config.rollout_timeout = Duration::from_secs(60);
        config.rollout_poll_interval = Duration::from_secs(5);
        config.health_timeout = Duration::from_secs(30);
        config.health_poll_interval = Duration::from_secs(5);
        config.address_timeout = Duration::from_secs(120);
        config.address_poll_interval = Duration::from_secs(10);
        config.approval_timeout = Duration::from_secs(30 * 60);
        config.approval_poll_interval = Duration::from_secs(15);
        config.record_append_attempts = 3;

        Self {
            builds: Arc::new(FakeBuilds::new()),
            scanner: Arc::new(FakeScanner::new()),
            health: Arc::new(FakeHealth::linked(cluster.clone())),
            cluster,
            addresses,
            approvals: Arc::new(LocalApprovalGate::new()),
            records: Arc::new(InMemoryDeploymentLog::new()),
            runs: Arc::new(InMemoryRunStore::new()),
            config,
        }
    }

    pub fn collaborators(&self) -> Collaborators {
        Collaborators {
            builds: self.builds.clone(),
            cluster: self.cluster.clone(),
            addresses: self.addresses.clone(),
            health: self.health.clone(),
            approvals: self.approvals.clone(),
            scanner: self.scanner.clone(),
        }
    }

    pub async fn orchestrator(&self) -> Arc<Orchestrator> {
        let orchestrator = Orchestrator::new(
            &self.config,
            ServiceCatalog::standard(),
            self.collaborators(),
            self.records.clone(),
            self.runs.clone(),
        )
        .await
        .unwrap();
        Arc::new(orchestrator)
    }

    /// Appends a successful release record, as a finished earlier run would have
    pub async fn seed_release(
        &self,
        environment: Environment,
        service: Service,
        revision: &Revision,
        run_number: u64,
    ) -> DeploymentRecord {
        let record = DeploymentRecord {
            id: Uuid::new_v4(),
            environment,
            service,
            image: ImageReference::for_run(service, environment, revision, run_number),
            run_id: Some(Uuid::new_v4()),
            run_number: Some(run_number),
            purpose: DeploymentPurpose::Release,
            outcome: DeploymentOutcome::Succeeded,
            reason: None,
            recorded_at: Utc::now(),
        };
        self.records.append(&record).await.unwrap();
        record
    }
}
