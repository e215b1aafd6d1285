//! Deployment history endpoint

use crate::OrchestratorClient;
use crate::error::Result;
use gantry_core::domain::environment::Environment;
use gantry_core::domain::record::DeploymentRecord;
use gantry_core::domain::service::Service;

impl OrchestratorClient {
    /// Every recorded deployment of a service, oldest first
    pub async fn deployment_history(
        &self,
        environment: Environment,
        service: Service,
    ) -> Result<Vec<DeploymentRecord>> {
        let response = self
            .client
            .get(self.url(&format!(
                "deployment/{}/{}/history",
                environment.as_str(),
                service.as_str()
            )))
            .send()
            .await?;

        self.handle_response(response).await
    }
}
