//! Rollback command handler

use anyhow::{Context, Result};
use colored::*;
use gantry_client::OrchestratorClient;
use gantry_core::domain::environment::Environment;
use gantry_core::domain::rollback::{RollbackReport, RollbackStatus, ServiceRollbackOutcome};
use gantry_core::domain::service::Service;
use gantry_core::dto::rollback::RollbackRequest;

use crate::config::Config;

pub async fn handle_rollback(
    environment: Environment,
    service: Option<Service>,
    config: &Config,
) -> Result<()> {
    let client = OrchestratorClient::new(&config.orchestrator_url);

    let report = client
        .rollback(RollbackRequest {
            environment,
            service,
        })
        .await
        .with_context(|| format!("Rollback of {} failed", environment))?;

    print_report(&report);
    Ok(())
}

pub(crate) fn print_report(report: &RollbackReport) {
    let status = match report.status {
        RollbackStatus::Completed => "completed".green().bold(),
        RollbackStatus::Failed => "failed: manual intervention required".red().bold(),
    };
    println!("{} {}", format!("Rollback in {}", report.environment).bold(), status);

    for entry in &report.services {
        let line = match &entry.outcome {
            ServiceRollbackOutcome::Reverted { from, to } => {
                format!("reverted {} → {}", from.tag, to.tag).green()
            }
            ServiceRollbackOutcome::Skipped => "skipped (not deployed by this run)".dimmed(),
            ServiceRollbackOutcome::NoPriorRecord => "no earlier successful deployment".yellow(),
            ServiceRollbackOutcome::DeployFailed { to, reason } => {
                format!("deploy of {} failed: {}", to.tag, reason).red()
            }
            ServiceRollbackOutcome::HealthCheckFailed { to } => {
                format!("{} unhealthy after rollback", to.tag).red()
            }
            ServiceRollbackOutcome::Halted => "not attempted".dimmed(),
        };
        println!("  {:<12} {}", entry.service.to_string(), line);
    }
}
