//! Rollback endpoint

use crate::OrchestratorClient;
use crate::error::Result;
use gantry_core::domain::rollback::RollbackReport;
use gantry_core::dto::rollback::RollbackRequest;

impl OrchestratorClient {
    /// Roll back one service, or every service when `req.service` is `None`
    ///
    /// Fails with a 409 API error while a run is active in the environment.
    pub async fn rollback(&self, req: RollbackRequest) -> Result<RollbackReport> {
        let response = self
            .client
            .post(self.url("rollback"))
            .json(&req)
            .send()
            .await?;

        self.handle_response(response).await
    }
}
