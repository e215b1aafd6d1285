//! History command handler

use anyhow::Result;
use colored::*;
use gantry_client::OrchestratorClient;
use gantry_core::domain::environment::Environment;
use gantry_core::domain::record::{DeploymentOutcome, DeploymentPurpose};
use gantry_core::domain::service::Service;

use crate::config::Config;

pub async fn handle_history(
    environment: Environment,
    service: Service,
    json: bool,
    config: &Config,
) -> Result<()> {
    let client = OrchestratorClient::new(&config.orchestrator_url);
    let records = client.deployment_history(environment, service).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&records)?);
        return Ok(());
    }

    if records.is_empty() {
        println!(
            "{}",
            format!("No deployments of {} in {}.", service, environment).yellow()
        );
        return Ok(());
    }

    println!(
        "{}",
        format!("Deployments of {} in {} (oldest first):", service, environment).bold()
    );
    for record in records {
        let outcome = match record.outcome {
            DeploymentOutcome::Succeeded => "✓".green(),
            DeploymentOutcome::Failed => "✗".red(),
        };
        let purpose = match record.purpose {
            DeploymentPurpose::Release => "release",
            DeploymentPurpose::Rollback => "rollback",
        };
        println!(
            "  {} {}  {:<34} {:<8} {}",
            outcome,
            record.recorded_at.format("%Y-%m-%d %H:%M:%S").to_string().dimmed(),
            record.image.tag,
            purpose,
            record.reason.unwrap_or_default().red()
        );
    }

    Ok(())
}
