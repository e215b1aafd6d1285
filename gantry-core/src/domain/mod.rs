//! Core domain types
//!
//! This module contains the deployment entities shared by the orchestrator
//! (which owns and persists them), the client and the CLI.

pub mod address;
pub mod environment;
pub mod failure;
pub mod image;
pub mod record;
pub mod revision;
pub mod rollback;
pub mod run;
pub mod service;
