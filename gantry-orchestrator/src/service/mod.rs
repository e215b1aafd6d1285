//! Deployment engine
//!
//! Leaf components (builder, executor, resolver, prober) are composed by
//! the orchestrator and the rollback controller.

pub mod builder;
pub mod deployer;
pub mod discovery;
pub mod health;
pub mod lease;
pub mod orchestrator;
pub mod poll;
pub mod rollback;
pub mod run_config;

#[cfg(test)]
pub mod testing;

pub use orchestrator::{CancelError, Orchestrator, OperatorRollbackError, TriggerError};
