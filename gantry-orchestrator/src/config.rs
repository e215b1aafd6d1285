//! Orchestrator configuration
//!
//! Defines every configurable parameter of the orchestrator: where it
//! listens, where the platform collaborators live, and the deadline of
//! every blocking wait (rollout, health, address, approval).

use std::time::Duration;

/// Orchestrator configuration
///
/// All timeouts and intervals are configurable so slow load balancers or
/// long approval windows can be accommodated per installation.
#[derive(Debug, Clone)]
pub struct Config {
    /// PostgreSQL URL for the deployment record log; `None` keeps records in memory
    pub database_url: Option<String>,

    /// Address the HTTP API binds to
    pub bind_addr: String,

    /// Base URL of the platform gateway (build, cluster, load balancer, scanner)
    pub platform_url: String,

    /// Maximum time a rollout may take before it is recorded as `timeout`
    pub rollout_timeout: Duration,
    pub rollout_poll_interval: Duration,

    /// Maximum time a freshly deployed service may take to report healthy
    pub health_timeout: Duration,
    pub health_poll_interval: Duration,

    /// Maximum time to wait for a load balancer to assign an address
    pub address_timeout: Duration,
    pub address_poll_interval: Duration,

    /// Maximum time a production run waits for operator approval
    pub approval_timeout: Duration,
    pub approval_poll_interval: Duration,

    /// How many times a deployment record append is attempted
    pub record_append_attempts: u32,
}

impl Config {
    /// Creates a configuration with default timeouts
    pub fn new(platform_url: String) -> Self {
        Self {
            database_url: None,
            bind_addr: "0.0.0.0:8080".to_string(),
            platform_url,
            rollout_timeout: Duration::from_secs(600),
            rollout_poll_interval: Duration::from_secs(5),
            health_timeout: Duration::from_secs(120),
            health_poll_interval: Duration::from_secs(5),
            address_timeout: Duration::from_secs(300), // load balancers are slow to provision
            address_poll_interval: Duration::from_secs(10),
            approval_timeout: Duration::from_secs(30 * 60),
            approval_poll_interval: Duration::from_secs(15),
            record_append_attempts: 5,
        }
    }

    /// Creates configuration from environment variables
    ///
    /// Expected environment variables:
    /// - PLATFORM_URL (required)
    /// - DATABASE_URL (optional, records kept in memory when unset)
    /// - ORCHESTRATOR_BIND_ADDR (optional, default: 0.0.0.0:8080)
    /// - ROLLOUT_TIMEOUT / ROLLOUT_POLL_INTERVAL (seconds, default: 600 / 5)
    /// - HEALTH_TIMEOUT / HEALTH_POLL_INTERVAL (seconds, default: 120 / 5)
    /// - ADDRESS_TIMEOUT / ADDRESS_POLL_INTERVAL (seconds, default: 300 / 10)
    /// - APPROVAL_TIMEOUT / APPROVAL_POLL_INTERVAL (seconds, default: 1800 / 15)
    /// - RECORD_APPEND_ATTEMPTS (optional, default: 5)
    pub fn from_env() -> anyhow::Result<Self> {
        let platform_url = std::env::var("PLATFORM_URL")
            .map_err(|_| anyhow::anyhow!("PLATFORM_URL environment variable not set"))?;

        let defaults = Self::new(platform_url);

        Ok(Self {
            database_url: std::env::var("DATABASE_URL").ok().filter(|s| !s.is_empty()),
            bind_addr: std::env::var("ORCHESTRATOR_BIND_ADDR").unwrap_or(defaults.bind_addr),
            rollout_timeout: secs_from_env("ROLLOUT_TIMEOUT", defaults.rollout_timeout),
            rollout_poll_interval: secs_from_env(
                "ROLLOUT_POLL_INTERVAL",
                defaults.rollout_poll_interval,
            ),
            health_timeout: secs_from_env("HEALTH_TIMEOUT", defaults.health_timeout),
            health_poll_interval: secs_from_env("HEALTH_POLL_INTERVAL", defaults.health_poll_interval),
            address_timeout: secs_from_env("ADDRESS_TIMEOUT", defaults.address_timeout),
            address_poll_interval: secs_from_env(
                "ADDRESS_POLL_INTERVAL",
                defaults.address_poll_interval,
            ),
            approval_timeout: secs_from_env("APPROVAL_TIMEOUT", defaults.approval_timeout),
            approval_poll_interval: secs_from_env(
                "APPROVAL_POLL_INTERVAL",
                defaults.approval_poll_interval,
            ),
            record_append_attempts: std::env::var("RECORD_APPEND_ATTEMPTS")
                .ok()
                .and_then(|s| s.parse::<u32>().ok())
                .unwrap_or(defaults.record_append_attempts),
            platform_url: defaults.platform_url,
        })
    }

    /// Validates the configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.platform_url.is_empty() {
            anyhow::bail!("platform_url cannot be empty");
        }

        if !self.platform_url.starts_with("http://") && !self.platform_url.starts_with("https://")
        {
            anyhow::bail!("platform_url must start with http:// or https://");
        }

        let waits = [
            ("rollout", self.rollout_timeout, self.rollout_poll_interval),
            ("health", self.health_timeout, self.health_poll_interval),
            ("address", self.address_timeout, self.address_poll_interval),
            ("approval", self.approval_timeout, self.approval_poll_interval),
        ];

        for (name, timeout, interval) in waits {
            if timeout.is_zero() {
                anyhow::bail!("{}_timeout must be greater than 0", name);
            }
            if interval.is_zero() {
                anyhow::bail!("{}_poll_interval must be greater than 0", name);
            }
            if interval > timeout {
                anyhow::bail!("{}_poll_interval cannot exceed {}_timeout", name, name);
            }
        }

        if self.record_append_attempts == 0 {
            anyhow::bail!("record_append_attempts must be at least 1");
        }

        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::new("http://localhost:9000".to_string())
    }
}

fn secs_from_env(name: &str, default: Duration) -> Duration {
    std::env::var(name)
        .ok()
        .and_then(|s| s.parse::<u64>().ok())
        .map(Duration::from_secs)
        .unwrap_or(default)
}
