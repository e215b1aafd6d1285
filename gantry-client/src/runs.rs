//! Pipeline run endpoints

use crate::OrchestratorClient;
use crate::error::Result;
use gantry_core::domain::environment::Environment;
use gantry_core::domain::run::PipelineRun;
use gantry_core::dto::run::{RunSummary, TriggerRun};
use uuid::Uuid;

impl OrchestratorClient {
    // =============================================================================
    // Pipeline Runs
    // =============================================================================

    /// Start a run; it executes in the background on the orchestrator
    ///
    /// # Example
    /// ```no_run
    /// # use gantry_client::OrchestratorClient;
    /// # use gantry_core::domain::environment::Environment;
    /// # use gantry_core::dto::run::TriggerRun;
    /// # async fn example() -> anyhow::Result<()> {
    /// let client = OrchestratorClient::new("http://localhost:8080");
    /// let run = client.trigger_run(TriggerRun {
    ///     environment: Environment::Production,
    ///     commit: "9e1c0d2f44ab".to_string(),
    ///     branch: "main".to_string(),
    /// }).await?;
    /// client.approve_run(run.id).await?;
    /// # Ok(())
    /// # }
    /// ```
    pub async fn trigger_run(&self, req: TriggerRun) -> Result<PipelineRun> {
        let response = self
            .client
            .post(self.url("run/trigger"))
            .json(&req)
            .send()
            .await?;

        self.handle_response(response).await
    }

    /// List runs, newest first
    pub async fn list_runs(&self, environment: Option<Environment>) -> Result<Vec<RunSummary>> {
        let mut request = self.client.get(self.url("run/list"));
        if let Some(environment) = environment {
            request = request.query(&[("environment", environment.as_str())]);
        }
        let response = request.send().await?;

        self.handle_response(response).await
    }

    pub async fn get_run(&self, run_id: Uuid) -> Result<PipelineRun> {
        let response = self
            .client
            .get(self.url(&format!("run/{}", run_id)))
            .send()
            .await?;

        self.handle_response(response).await
    }

    /// Sign off a production run waiting at the approval gate
    pub async fn approve_run(&self, run_id: Uuid) -> Result<PipelineRun> {
        let response = self
            .client
            .post(self.url(&format!("run/{}/approve", run_id)))
            .send()
            .await?;

        self.handle_response(response).await
    }

    /// Request cancellation; the run stops at its next stage boundary
    pub async fn cancel_run(&self, run_id: Uuid) -> Result<PipelineRun> {
        let response = self
            .client
            .post(self.url(&format!("run/{}/cancel", run_id)))
            .send()
            .await?;

        self.handle_response(response).await
    }
}
