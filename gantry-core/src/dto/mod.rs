//! Data Transfer Objects for the orchestrator API
//!
//! Request bodies and lightweight summaries exchanged between the
//! orchestrator, the client library and the CLI.

pub mod rollback;
pub mod run;
