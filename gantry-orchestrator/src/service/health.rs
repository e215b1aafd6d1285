//! Health Prober
//!
//! Polls a service's health signal until it reports healthy or the timeout
//! elapses. A failing probe is transient; only the timeout is terminal.

use gantry_core::domain::environment::Environment;
use gantry_core::domain::service::Service;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::collaborator::HealthEndpoint;
use crate::service::poll::Deadline;

pub struct HealthProber {
    endpoint: Arc<dyn HealthEndpoint>,
    interval: Duration,
}

impl HealthProber {
    pub fn new(endpoint: Arc<dyn HealthEndpoint>, interval: Duration) -> Self {
        Self { endpoint, interval }
    }

    /// Returns `true` on the first healthy probe, `false` once `timeout` elapses
    pub async fn wait_healthy(
        &self,
        environment: Environment,
        service: Service,
        timeout: Duration,
    ) -> bool {
        let deadline = Deadline::new(timeout, self.interval);
        let mut attempts = 0u32;

        loop {
            attempts += 1;
            match self.endpoint.is_healthy(environment, service).await {
                Ok(true) => {
                    info!(
                        "{} in {} healthy after {} probe(s)",
                        service, environment, attempts
                    );
                    return true;
                }
                Ok(false) => debug!("{} in {} not healthy yet", service, environment),
                Err(e) => warn!("Health probe of {} in {} failed: {}", service, environment, e),
            }

            if !deadline.wait_next().await {
                warn!(
                    "{} in {} not healthy within {:?} ({} probes)",
                    service, environment, timeout, attempts
                );
                return false;
            }
        }
    }
}
