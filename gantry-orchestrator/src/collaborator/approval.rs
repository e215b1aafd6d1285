//! In-process approval gate
//!
//! Operators approve production runs through the orchestrator API; the
//! approvals are kept here until the run that waits for them picks them up.

use async_trait::async_trait;
use std::collections::HashSet;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{ApprovalGate, CollaboratorError};

#[derive(Debug, Default)]
pub struct LocalApprovalGate {
    approved: RwLock<HashSet<Uuid>>,
}

impl LocalApprovalGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records operator sign-off for a run; approving twice is harmless
    pub async fn approve(&self, run_id: Uuid) {
        let newly = self.approved.write().await.insert(run_id);
        if newly {
            tracing::info!("Run {} approved", run_id);
        }
    }
}

#[async_trait]
impl ApprovalGate for LocalApprovalGate {
    async fn is_approved(&self, run_id: Uuid) -> Result<bool, CollaboratorError> {
        Ok(self.approved.read().await.contains(&run_id))
    }

    async fn forget(&self, run_id: Uuid) {
        self.approved.write().await.remove(&run_id);
    }
}
