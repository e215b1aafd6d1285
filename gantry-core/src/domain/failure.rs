//! Failure taxonomy shared by every pipeline stage
//!
//! A [`StageFailure`] names the environment, service, step and reason so an
//! operator can diagnose a run from its record alone.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use super::environment::Environment;
use super::service::Service;

/// Step of a stage (or of the run itself) that failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Step {
    Approval,
    Build,
    Scan,
    Deploy,
    Discover,
    Health,
    Rollback,
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Step::Approval => "approval",
            Step::Build => "build",
            Step::Scan => "scan",
            Step::Deploy => "deploy",
            Step::Discover => "discover",
            Step::Health => "health",
            Step::Rollback => "rollback",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FailureKind {
    BuildError,
    ScanFailed,
    RolloutTimeout,
    RolloutRejected,
    RolloutFailed,
    /// The cluster never confirmed an outcome; nothing was recorded
    RolloutUnknown,
    NotExposed,
    AddressResolutionTimeout,
    ApprovalTimeout,
    HealthCheckFailed,
    NoPriorRecord,
    Cancelled,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Error)]
#[error("[{environment}] {step}{} failed ({kind}): {reason}", service_suffix(.service))]
pub struct StageFailure {
    pub environment: Environment,
    pub service: Option<Service>,
    pub step: Step,
    pub kind: FailureKind,
    pub reason: String,
}

impl StageFailure {
    pub fn new(
        environment: Environment,
        service: Service,
        step: Step,
        kind: FailureKind,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            environment,
            service: Some(service),
            step,
            kind,
            reason: reason.into(),
        }
    }

    pub fn approval_timeout(environment: Environment) -> Self {
        Self {
            environment,
            service: None,
            step: Step::Approval,
            kind: FailureKind::ApprovalTimeout,
            reason: "approval timeout".to_string(),
        }
    }

    pub fn cancelled(environment: Environment, step: Step, service: Option<Service>) -> Self {
        Self {
            environment,
            service,
            step,
            kind: FailureKind::Cancelled,
            reason: "cancelled by operator".to_string(),
        }
    }
}

fn service_suffix(service: &Option<Service>) -> String {
    match service {
        Some(service) => format!(" of {}", service),
        None => String::new(),
    }
}
