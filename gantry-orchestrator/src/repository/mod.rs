//! Repository Module
//!
//! Persistence layer for the orchestrator.
//! - `record`: the append-only deployment record log (rollback history)
//! - `run`: pipeline runs owned by this orchestrator process

pub mod record;
pub mod run;

pub use record::{DeploymentLog, InMemoryDeploymentLog, PgDeploymentLog};
pub use run::{InMemoryRunStore, RunStore};

use thiserror::Error;

/// Repository error type
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("stored row is not readable: {0}")]
    Corrupt(String),

    #[error("store unavailable: {0}")]
    Unavailable(String),
}
