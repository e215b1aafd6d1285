//! Pipeline Run Repository
//!
//! Runs belong to the orchestrator process that executes them; only the
//! deployment record log needs to outlive it.

use async_trait::async_trait;
use gantry_core::domain::environment::Environment;
use gantry_core::domain::run::PipelineRun;
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::StoreError;

#[async_trait]
pub trait RunStore: Send + Sync {
    /// Inserts or replaces the stored snapshot of a run
    async fn save(&self, run: &PipelineRun) -> Result<(), StoreError>;

    async fn get(&self, id: Uuid) -> Result<Option<PipelineRun>, StoreError>;

    /// Runs newest first, optionally restricted to one environment
    async fn list(&self, environment: Option<Environment>) -> Result<Vec<PipelineRun>, StoreError>;
}

#[derive(Debug, Default)]
pub struct InMemoryRunStore {
    runs: RwLock<HashMap<Uuid, PipelineRun>>,
}

impl InMemoryRunStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RunStore for InMemoryRunStore {
    async fn save(&self, run: &PipelineRun) -> Result<(), StoreError> {
        self.runs.write().await.insert(run.id, run.clone());
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<PipelineRun>, StoreError> {
        Ok(self.runs.read().await.get(&id).cloned())
    }

    async fn list(&self, environment: Option<Environment>) -> Result<Vec<PipelineRun>, StoreError> {
        let runs = self.runs.read().await;
        let mut selected: Vec<PipelineRun> = runs
            .values()
            .filter(|run| environment.is_none_or(|env| run.environment == env))
            .cloned()
            .collect();
        selected.sort_by(|a, b| b.run_number.cmp(&a.run_number));
        Ok(selected)
    }
}
