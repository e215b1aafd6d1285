//! Gantry Core
//!
//! Core types for the Gantry deployment orchestrator.
//!
//! This crate contains:
//! - Domain types: environments, services, image references, deployment
//!   records, pipeline runs and rollback reports
//! - DTOs: request and summary types for the orchestrator API

pub mod domain;
pub mod dto;
