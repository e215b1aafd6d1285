//! Run command handlers
//!
//! Triggering, listing, inspecting, approving and cancelling pipeline runs.

use anyhow::{Context, Result, bail};
use clap::Subcommand;
use colored::*;
use gantry_client::OrchestratorClient;
use gantry_core::domain::environment::Environment;
use gantry_core::domain::run::{PipelineRun, StageResult, StageStatus};
use gantry_core::dto::run::{RunSummary, TriggerRun};
use std::time::Duration;
use tokio::time::Instant;

use super::colorize_status;
use crate::config::Config;
use crate::id_resolver::resolve_run_id;
use crate::types::IdOrPrefix;

const WAIT_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Run subcommands
#[derive(Subcommand)]
pub enum RunCommands {
    /// Start a pipeline run for a source revision
    Trigger {
        /// staging or production
        environment: Environment,

        /// Commit hash of the revision
        #[arg(short, long)]
        commit: String,

        /// Branch the commit belongs to
        #[arg(short, long)]
        branch: String,

        /// Wait until the run finishes
        #[arg(short, long)]
        wait: bool,

        /// Stop waiting after this many seconds
        #[arg(long, default_value_t = 3600, requires = "wait")]
        timeout: u64,
    },
    /// List runs, newest first
    List {
        #[arg(short, long)]
        environment: Option<Environment>,
    },
    /// Get run details
    Get {
        /// Run ID or unambiguous prefix
        id: String,

        /// Print raw JSON
        #[arg(long)]
        json: bool,
    },
    /// Approve a production run waiting at the approval gate
    Approve {
        /// Run ID or unambiguous prefix
        id: String,
    },
    /// Cancel a run at its next stage boundary
    Cancel {
        /// Run ID or unambiguous prefix
        id: String,
    },
}

pub async fn handle_run_command(command: RunCommands, config: &Config) -> Result<()> {
    let client = OrchestratorClient::new(&config.orchestrator_url);

    match command {
        RunCommands::Trigger {
            environment,
            commit,
            branch,
            wait,
            timeout,
        } => {
            let wait = wait.then(|| Duration::from_secs(timeout));
            trigger_run(&client, environment, commit, branch, wait).await
        }
        RunCommands::List { environment } => list_runs(&client, environment).await,
        RunCommands::Get { id, json } => get_run(&client, &id, json).await,
        RunCommands::Approve { id } => approve_run(&client, &id).await,
        RunCommands::Cancel { id } => cancel_run(&client, &id).await,
    }
}

async fn trigger_run(
    client: &OrchestratorClient,
    environment: Environment,
    commit: String,
    branch: String,
    wait: Option<Duration>,
) -> Result<()> {
    let run = client
        .trigger_run(TriggerRun {
            environment,
            commit,
            branch,
        })
        .await
        .context("Failed to trigger run")?;

    println!("{}", "✓ Run triggered".green().bold());
    println!("  ID:       {}", run.id.to_string().cyan());
    println!("  Number:   #{}", run.run_number);
    println!("  Revision: {}", run.revision);
    if environment.requires_approval() {
        println!(
            "  {}",
            format!("Waiting for approval: gantry run approve {}", short_id(&run)).yellow()
        );
    }

    if let Some(timeout) = wait {
        let finished = poll_until_finished(&run, timeout, || client.get_run(run.id)).await?;
        println!();
        print_run_details(&finished);
    }

    Ok(())
}

async fn poll_until_finished<F, Fut>(
    run: &PipelineRun,
    timeout: Duration,
    mut fetch: F,
) -> Result<PipelineRun>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = gantry_client::Result<PipelineRun>>,
{
    let deadline = Instant::now() + timeout;
    let mut last_status = run.status;
    loop {
        let current = fetch().await?;
        if current.status != last_status {
            println!("  {} {}", "▸".cyan(), colorize_status(current.status));
            last_status = current.status;
        }
        if current.status.is_terminal() {
            return Ok(current);
        }
        if Instant::now() + WAIT_POLL_INTERVAL > deadline {
            bail!(
                "Run #{} still {} after {}s; check on it with: gantry run get {}",
                current.run_number,
                current.status,
                timeout.as_secs(),
                short_id(&current)
            );
        }
        tokio::time::sleep(WAIT_POLL_INTERVAL).await;
    }
}

async fn list_runs(client: &OrchestratorClient, environment: Option<Environment>) -> Result<()> {
    let runs = client.list_runs(environment).await?;

    if runs.is_empty() {
        println!("{}", "No runs found.".yellow());
        return Ok(());
    }

    println!("{}", format!("Found {} run(s):", runs.len()).bold());
    println!();
    for run in runs {
        print_run_summary(&run);
    }

    Ok(())
}

async fn get_run(client: &OrchestratorClient, id: &str, json: bool) -> Result<()> {
    let uuid = resolve_run_id(client, &IdOrPrefix::parse(id)).await?;
    let run = client.get_run(uuid).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&run)?);
    } else {
        print_run_details(&run);
    }

    Ok(())
}

async fn approve_run(client: &OrchestratorClient, id: &str) -> Result<()> {
    let uuid = resolve_run_id(client, &IdOrPrefix::parse(id)).await?;
    let run = client.approve_run(uuid).await?;

    println!(
        "{} run #{} ({}) approved",
        "✓".green().bold(),
        run.run_number,
        run.environment
    );
    Ok(())
}

async fn cancel_run(client: &OrchestratorClient, id: &str) -> Result<()> {
    let uuid = resolve_run_id(client, &IdOrPrefix::parse(id)).await?;
    let run = client.cancel_run(uuid).await?;

    println!(
        "{} cancellation of run #{} requested; it stops at the next stage boundary",
        "✓".green().bold(),
        run.run_number
    );
    Ok(())
}

// ===== Output ===== //

fn short_id(run: &PipelineRun) -> String {
    run.id.to_string()[..8].to_string()
}

fn print_run_summary(run: &RunSummary) {
    println!(
        "  {} #{} {} {}",
        "▸".cyan(),
        run.run_number,
        run.environment.to_string().bold(),
        run.id.to_string().dimmed()
    );
    println!("    Revision: {}", run.revision);
    println!("    Status:   {}", colorize_status(run.status));
    println!(
        "    Created:  {}",
        run.created_at
            .format("%Y-%m-%d %H:%M:%S")
            .to_string()
            .dimmed()
    );
    println!();
}

fn print_run_details(run: &PipelineRun) {
    println!("{}", format!("Run #{}", run.run_number).bold());
    println!("  ID:          {}", run.id.to_string().cyan());
    println!("  Environment: {}", run.environment);
    println!("  Revision:    {}", run.revision);
    println!("  Status:      {}", colorize_status(run.status));
    println!("  Created:     {}", run.created_at.format("%Y-%m-%d %H:%M:%S"));
    if let Some(approved) = run.approved_at {
        println!("  Approved:    {}", approved.format("%Y-%m-%d %H:%M:%S"));
    }
    if let (Some(started), Some(completed)) = (run.started_at, run.completed_at) {
        let seconds = completed.signed_duration_since(started).num_seconds();
        println!("  Duration:    {}s", seconds);
    }

    println!("\n{}", "Stages:".bold());
    for stage in &run.stages {
        print_stage(stage);
    }

    if let Some(failure) = &run.failure {
        println!("\n{}", "Failure:".bold());
        println!("  {}", failure.to_string().red());
    }

    if let Some(report) = &run.rollback {
        println!();
        super::rollback::print_report(report);
    }
}

fn print_stage(stage: &StageResult) {
    let marker = match stage.status {
        StageStatus::NotAttempted => "·".dimmed(),
        StageStatus::Running => "▸".blue(),
        StageStatus::Succeeded => "✓".green(),
        StageStatus::Failed => "✗".red(),
    };
    let image = stage
        .image
        .as_ref()
        .map(|i| i.tag.clone())
        .unwrap_or_default();
    println!("  {} {:<12} {}", marker, stage.service.to_string(), image.dimmed());
    if let Some(address) = &stage.address {
        println!("      address: {}", address);
    }
}
