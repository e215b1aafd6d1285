//! Collaborator contracts
//!
//! The orchestrator drives the build service, the cluster control plane,
//! the load-balancer address provider, the vulnerability scanner and the
//! approval gate as black boxes. Each one is a trait so the engine can be
//! exercised against in-memory fakes and deployed against the platform's
//! HTTP gateway.

pub mod approval;
pub mod http;

pub use approval::LocalApprovalGate;
pub use http::PlatformClient;

use async_trait::async_trait;
use gantry_core::domain::address::Address;
use gantry_core::domain::environment::Environment;
use gantry_core::domain::image::ImageReference;
use gantry_core::domain::service::Service;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

/// Transport-level failure talking to a collaborator
#[derive(Debug, Clone, Error)]
pub enum CollaboratorError {
    #[error("{collaborator} is unavailable: {message}")]
    Unavailable {
        collaborator: &'static str,
        message: String,
    },

    #[error("{collaborator} sent an unexpected response: {message}")]
    Protocol {
        collaborator: &'static str,
        message: String,
    },
}

/// What the build service is asked to produce
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildRequest {
    pub image: ImageReference,
    pub commit: String,
    pub build_context: String,
    pub build_args: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Error)]
pub enum BuildError {
    /// Compile or test failure; never retried
    #[error("build of {image} failed: {reason}")]
    Failed {
        image: ImageReference,
        reason: String,
    },

    #[error(transparent)]
    Collaborator(#[from] CollaboratorError),
}

#[async_trait]
pub trait BuildService: Send + Sync {
    async fn build(&self, request: &BuildRequest) -> Result<ImageReference, BuildError>;
}

/// Answer of the control plane to a new desired version
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "kebab-case")]
pub enum ApplyResponse {
    Accepted,
    Rejected { reason: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RolloutStatus {
    Ready,
    Pending,
    Failed,
}

#[async_trait]
pub trait ClusterControlPlane: Send + Sync {
    async fn apply_deployment(
        &self,
        environment: Environment,
        service: Service,
        image: &ImageReference,
    ) -> Result<ApplyResponse, CollaboratorError>;

    async fn rollout_status(
        &self,
        environment: Environment,
        service: Service,
        image: &ImageReference,
    ) -> Result<RolloutStatus, CollaboratorError>;
}

#[async_trait]
pub trait AddressProvider: Send + Sync {
    /// Address currently assigned to the service, `None` while provisioning
    async fn external_address(
        &self,
        environment: Environment,
        service: Service,
    ) -> Result<Option<Address>, CollaboratorError>;
}

#[async_trait]
pub trait HealthEndpoint: Send + Sync {
    async fn is_healthy(
        &self,
        environment: Environment,
        service: Service,
    ) -> Result<bool, CollaboratorError>;
}

#[async_trait]
pub trait ApprovalGate: Send + Sync {
    async fn is_approved(&self, run_id: Uuid) -> Result<bool, CollaboratorError>;

    /// Drops whatever the gate keeps for a run that has finished
    async fn forget(&self, _run_id: Uuid) {}
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanReport {
    pub passed: bool,
    #[serde(default)]
    pub findings: Vec<String>,
}

#[async_trait]
pub trait VulnerabilityScanner: Send + Sync {
    async fn scan(&self, image: &ImageReference) -> Result<ScanReport, CollaboratorError>;
}

/// Every collaborator the engine talks to
#[derive(Clone)]
pub struct Collaborators {
    pub builds: Arc<dyn BuildService>,
    pub cluster: Arc<dyn ClusterControlPlane>,
    pub addresses: Arc<dyn AddressProvider>,
    pub health: Arc<dyn HealthEndpoint>,
    pub approvals: Arc<dyn ApprovalGate>,
    pub scanner: Arc<dyn VulnerabilityScanner>,
}
