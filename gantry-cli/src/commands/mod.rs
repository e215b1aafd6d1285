//! Commands module
//!
//! Defines all CLI commands and their handlers.

mod history;
mod rollback;
mod run;

pub use run::RunCommands;

use anyhow::Result;
use clap::Subcommand;
use colored::*;
use gantry_core::domain::environment::Environment;
use gantry_core::domain::run::RunStatus;
use gantry_core::domain::service::Service;

use crate::config::Config;

/// Top-level CLI commands
#[derive(Subcommand)]
pub enum Commands {
    /// Pipeline run management
    Run {
        #[command(subcommand)]
        command: RunCommands,
    },
    /// Roll an environment (or one service) back to its previous deployment
    Rollback {
        /// staging or production
        environment: Environment,

        /// Only this service (backend-api, frontend); all services when omitted
        #[arg(short, long)]
        service: Option<Service>,
    },
    /// Show the deployment history of a service
    History {
        environment: Environment,
        service: Service,

        /// Print raw JSON
        #[arg(long)]
        json: bool,
    },
}

/// Routes the command to the appropriate handler module
pub async fn handle_command(command: Commands, config: &Config) -> Result<()> {
    match command {
        Commands::Run { command } => run::handle_run_command(command, config).await,
        Commands::Rollback {
            environment,
            service,
        } => rollback::handle_rollback(environment, service, config).await,
        Commands::History {
            environment,
            service,
            json,
        } => history::handle_history(environment, service, json, config).await,
    }
}

/// Colorize a run status for display
pub(crate) fn colorize_status(status: RunStatus) -> ColoredString {
    let text = status.to_string();
    match status {
        RunStatus::Pending => text.yellow(),
        RunStatus::Running => text.blue(),
        RunStatus::Succeeded => text.green(),
        RunStatus::Failed | RunStatus::RollbackFailed => text.red().bold(),
        RunStatus::RolledBack => text.magenta(),
        RunStatus::Cancelled => text.dimmed(),
    }
}
