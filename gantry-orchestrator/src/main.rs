//! Gantry Orchestrator
//!
//! Sequences builds, deployments, address discovery, health validation and
//! rollback of the application's services across staging and production.
//!
//! Architecture:
//! - Collaborators: build service, cluster, load balancer, scanner, approvals
//! - Repositories: deployment record log (PostgreSQL) and pipeline runs
//! - Service: the deployment engine (orchestrator, executor, rollback, ...)
//! - API: axum HTTP endpoints used by the CLI

mod api;
mod collaborator;
mod config;
mod db;
mod repository;
mod service;

use anyhow::{Context, Result};
use gantry_core::domain::service::ServiceCatalog;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::api::AppState;
use crate::collaborator::{Collaborators, LocalApprovalGate, PlatformClient};
use crate::config::Config;
use crate::repository::{DeploymentLog, InMemoryDeploymentLog, InMemoryRunStore, PgDeploymentLog};
use crate::service::Orchestrator;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "gantry_orchestrator=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Gantry Orchestrator...");

    let config = Config::from_env().context("Failed to load configuration")?;
    config.validate().context("Invalid configuration")?;
    info!("Platform gateway: {}", config.platform_url);

    let records = open_deployment_log(&config).await?;

    let platform = Arc::new(
        PlatformClient::new(config.platform_url.clone())
            .context("Failed to create platform client")?,
    );
    let approvals = Arc::new(LocalApprovalGate::new());
    let collaborators = Collaborators {
        builds: platform.clone(),
        cluster: platform.clone(),
        addresses: platform.clone(),
        health: platform.clone(),
        approvals: approvals.clone(),
        scanner: platform,
    };

    let orchestrator = Orchestrator::new(
        &config,
        ServiceCatalog::standard(),
        collaborators,
        records,
        Arc::new(InMemoryRunStore::new()),
    )
    .await
    .context("Failed to read deployment history")?;

    let app = api::create_router(AppState {
        orchestrator: Arc::new(orchestrator),
        approvals,
    });

    info!("Listening on {}", config.bind_addr);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .with_context(|| format!("Failed to bind to {}", config.bind_addr))?;

    axum::serve(listener, app)
        .await
        .context("Failed to start server")?;

    Ok(())
}

/// PostgreSQL log when DATABASE_URL is set, otherwise a process-local one
async fn open_deployment_log(config: &Config) -> Result<Arc<dyn DeploymentLog>> {
    let Some(database_url) = &config.database_url else {
        warn!("DATABASE_URL not set; deployment history will not survive a restart");
        return Ok(Arc::new(InMemoryDeploymentLog::new()));
    };

    info!("Connecting to database...");
    let pool = db::create_pool(database_url)
        .await
        .context("Failed to create database pool")?;

    db::run_migrations(&pool)
        .await
        .context("Failed to run database migrations")?;
    info!("Deployment record log ready");

    Ok(Arc::new(PgDeploymentLog::new(pool)))
}
