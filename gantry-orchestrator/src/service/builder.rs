//! Artifact Builder
//!
//! Builds the image of one service for one run, then scans it.

use gantry_core::domain::environment::Environment;
use gantry_core::domain::failure::{FailureKind, StageFailure, Step};
use gantry_core::domain::image::ImageReference;
use gantry_core::domain::revision::Revision;
use gantry_core::domain::service::{Service, ServiceCatalog};
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};

use crate::collaborator::{BuildError, BuildRequest, BuildService, VulnerabilityScanner};
use crate::service::run_config::RunConfig;

#[derive(Debug, Clone, Error)]
pub enum ArtifactError {
    #[error("{0} is not in the service catalog")]
    UnknownService(Service),

    #[error(transparent)]
    Build(#[from] BuildError),

    #[error("scan of {image} did not pass: {reason}")]
    ScanFailed {
        image: ImageReference,
        reason: String,
    },
}

impl ArtifactError {
    pub fn into_stage_failure(self, environment: Environment, service: Service) -> StageFailure {
        let (step, kind) = match &self {
            ArtifactError::ScanFailed { .. } => (Step::Scan, FailureKind::ScanFailed),
            _ => (Step::Build, FailureKind::BuildError),
        };
        StageFailure::new(environment, service, step, kind, self.to_string())
    }
}

pub struct ArtifactBuilder {
    builds: Arc<dyn BuildService>,
    scanner: Arc<dyn VulnerabilityScanner>,
    catalog: Arc<ServiceCatalog>,
}

impl ArtifactBuilder {
    pub fn new(
        builds: Arc<dyn BuildService>,
        scanner: Arc<dyn VulnerabilityScanner>,
        catalog: Arc<ServiceCatalog>,
    ) -> Self {
        Self {
            builds,
            scanner,
            catalog,
        }
    }

    /// Builds and scans the image of `service` for run `run_number`
    pub async fn build(
        &self,
        service: Service,
        revision: &Revision,
        run_number: u64,
        config: &RunConfig,
    ) -> Result<ImageReference, ArtifactError> {
        let environment = config.environment();
        let spec = self
            .catalog
            .spec(service)
            .ok_or(ArtifactError::UnknownService(service))?;

        let request = BuildRequest {
            image: ImageReference::for_run(service, environment, revision, run_number),
            commit: revision.commit().to_string(),
            build_context: spec.build_context.clone(),
            build_args: config.build_args_for(spec, &self.catalog),
        };

        info!("Building {}", request.image);
        let image = self.builds.build(&request).await?;

        let verdict = match self.scanner.scan(&image).await {
            Ok(report) if report.passed => None,
            Ok(report) => Some(format!(
                "{} finding(s): {}",
                report.findings.len(),
                report.findings.join(", ")
            )),
            Err(e) => Some(e.to_string()),
        };

        if let Some(reason) = verdict {
            if environment.blocks_on_scan_findings() {
                return Err(ArtifactError::ScanFailed { image, reason });
            }
            warn!("Scan of {} did not pass, continuing in {}: {}", image, environment, reason);
        }

        Ok(image)
    }
}
