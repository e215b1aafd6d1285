//! HTTP adapters for the platform gateway
//!
//! One client speaks to every platform collaborator behind a single base URL:
//!
//! - `POST /build`                                             build an image
//! - `POST /scan`                                              scan an image
//! - `PUT  /clusters/{cluster}/deployments/{service}`          apply a version
//! - `GET  /clusters/{cluster}/deployments/{service}/rollout`  rollout status
//! - `GET  /clusters/{cluster}/services/{service}/address`     external address
//! - `GET  /clusters/{cluster}/services/{service}/health`      health signal

use async_trait::async_trait;
use gantry_core::domain::address::Address;
use gantry_core::domain::environment::Environment;
use gantry_core::domain::image::ImageReference;
use gantry_core::domain::service::Service;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use std::time::Duration;

use super::{
    AddressProvider, ApplyResponse, BuildError, BuildRequest, BuildService, ClusterControlPlane,
    CollaboratorError, HealthEndpoint, RolloutStatus, ScanReport, VulnerabilityScanner,
};

/// HTTP client for the platform gateway
#[derive(Debug, Clone)]
pub struct PlatformClient {
    base_url: String,
    client: Client,
}

impl PlatformClient {
    pub fn new(base_url: impl Into<String>) -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self::with_client(base_url, client))
    }

    pub fn with_client(base_url: impl Into<String>, client: Client) -> Self {
        let base_url = base_url.into();
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn cluster_url(&self, environment: Environment, path: &str) -> String {
        format!("{}/clusters/{}/{}", self.base_url, environment.cluster(), path)
    }

    async fn send(
        &self,
        collaborator: &'static str,
        request: reqwest::RequestBuilder,
    ) -> Result<reqwest::Response, CollaboratorError> {
        request
            .send()
            .await
            .map_err(|e| CollaboratorError::Unavailable {
                collaborator,
                message: e.to_string(),
            })
    }

    /// Checks the status code and deserializes the JSON body
    async fn json<T: DeserializeOwned>(
        collaborator: &'static str,
        response: reqwest::Response,
    ) -> Result<T, CollaboratorError> {
        let status = response.status();

        if !status.is_success() {
            let message = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(unexpected(collaborator, status, message));
        }

        response
            .json()
            .await
            .map_err(|e| CollaboratorError::Protocol {
                collaborator,
                message: format!("Failed to parse JSON response: {}", e),
            })
    }
}

fn unexpected(collaborator: &'static str, status: StatusCode, message: String) -> CollaboratorError {
    if status.is_server_error() {
        CollaboratorError::Unavailable {
            collaborator,
            message: format!("status {}: {}", status.as_u16(), message),
        }
    } else {
        CollaboratorError::Protocol {
            collaborator,
            message: format!("status {}: {}", status.as_u16(), message),
        }
    }
}

#[async_trait]
impl BuildService for PlatformClient {
    async fn build(&self, request: &BuildRequest) -> Result<ImageReference, BuildError> {
        let url = format!("{}/build", self.base_url);
        let response = self
            .send("build service", self.client.post(&url).json(request))
            .await?;

        // 422 carries the compiler or test output
        if response.status() == StatusCode::UNPROCESSABLE_ENTITY {
            let reason = response
                .text()
                .await
                .unwrap_or_else(|_| "build failed".to_string());
            return Err(BuildError::Failed {
                image: request.image.clone(),
                reason,
            });
        }

        Ok(Self::json("build service", response).await?)
    }
}

#[async_trait]
impl VulnerabilityScanner for PlatformClient {
    async fn scan(&self, image: &ImageReference) -> Result<ScanReport, CollaboratorError> {
        let url = format!("{}/scan", self.base_url);
        let response = self
            .send("vulnerability scanner", self.client.post(&url).json(image))
            .await?;
        Self::json("vulnerability scanner", response).await
    }
}

#[derive(Deserialize)]
struct RolloutBody {
    status: RolloutStatus,
}

#[async_trait]
impl ClusterControlPlane for PlatformClient {
    async fn apply_deployment(
        &self,
        environment: Environment,
        service: Service,
        image: &ImageReference,
    ) -> Result<ApplyResponse, CollaboratorError> {
        let url = self.cluster_url(environment, &format!("deployments/{}", service));
        let response = self
            .send("control plane", self.client.put(&url).json(image))
            .await?;

        match response.status() {
            StatusCode::CONFLICT | StatusCode::UNPROCESSABLE_ENTITY | StatusCode::FORBIDDEN => {
                let reason = response
                    .text()
                    .await
                    .unwrap_or_else(|_| "rejected".to_string());
                Ok(ApplyResponse::Rejected { reason })
            }
            status if status.is_success() => Ok(ApplyResponse::Accepted),
            status => {
                let message = response.text().await.unwrap_or_default();
                Err(unexpected("control plane", status, message))
            }
        }
    }

    async fn rollout_status(
        &self,
        environment: Environment,
        service: Service,
        image: &ImageReference,
    ) -> Result<RolloutStatus, CollaboratorError> {
        let url = self.cluster_url(environment, &format!("deployments/{}/rollout", service));
        let request = self.client.get(&url).query(&[("tag", image.tag.as_str())]);
        let response = self.send("control plane", request).await?;
        let body: RolloutBody = Self::json("control plane", response).await?;
        Ok(body.status)
    }
}

#[derive(Deserialize)]
struct AddressBody {
    address: Option<String>,
}

#[async_trait]
impl AddressProvider for PlatformClient {
    async fn external_address(
        &self,
        environment: Environment,
        service: Service,
    ) -> Result<Option<Address>, CollaboratorError> {
        let url = self.cluster_url(environment, &format!("services/{}/address", service));
        let response = self
            .send("address provider", self.client.get(&url))
            .await?;
        let body: AddressBody = Self::json("address provider", response).await?;
        Ok(body.address.filter(|a| !a.is_empty()).map(Address::new))
    }
}

#[async_trait]
impl HealthEndpoint for PlatformClient {
    async fn is_healthy(
        &self,
        environment: Environment,
        service: Service,
    ) -> Result<bool, CollaboratorError> {
        let url = self.cluster_url(environment, &format!("services/{}/health", service));
        let response = self.send("health endpoint", self.client.get(&url)).await?;
        Ok(response.status().is_success())
    }
}
