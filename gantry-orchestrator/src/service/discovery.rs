//! Service Discovery Resolver
//!
//! Waits for an exposed service to receive a routable address from the
//! load-balancer provider. Resolved addresses are snapshots: later calls
//! return the cached address until it is explicitly invalidated.

use gantry_core::domain::address::Address;
use gantry_core::domain::environment::Environment;
use gantry_core::domain::service::{Service, ServiceCatalog};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::collaborator::AddressProvider;
use crate::service::poll::Deadline;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResolveError {
    #[error("{service} has no externally routable endpoint in {environment}")]
    NotExposed {
        environment: Environment,
        service: Service,
    },

    #[error("no address assigned to {service} in {environment} within {waited:?}")]
    Timeout {
        environment: Environment,
        service: Service,
        waited: Duration,
    },
}

pub struct ServiceDiscoveryResolver {
    provider: Arc<dyn AddressProvider>,
    catalog: Arc<ServiceCatalog>,
    timeout: Duration,
    interval: Duration,
    resolved: Mutex<HashMap<(Environment, Service), Address>>,
}

impl ServiceDiscoveryResolver {
    pub fn new(
        provider: Arc<dyn AddressProvider>,
        catalog: Arc<ServiceCatalog>,
        timeout: Duration,
        interval: Duration,
    ) -> Self {
        Self {
            provider,
            catalog,
            timeout,
            interval,
            resolved: Mutex::new(HashMap::new()),
        }
    }

    /// Returns the service's address, polling the provider until one is assigned
    pub async fn resolve_address(
        &self,
        environment: Environment,
        service: Service,
    ) -> Result<Address, ResolveError> {
        if !self.catalog.is_exposed(service) {
            return Err(ResolveError::NotExposed {
                environment,
                service,
            });
        }

        if let Some(address) = self.resolved.lock().await.get(&(environment, service)) {
            debug!("Using resolved address {} for {}", address, service);
            return Ok(address.clone());
        }

        let deadline = Deadline::new(self.timeout, self.interval);
        loop {
            match self.provider.external_address(environment, service).await {
                Ok(Some(address)) => {
                    let mut resolved = self.resolved.lock().await;
                    // a concurrent resolution may have won; keep its snapshot
                    let address = resolved
                        .entry((environment, service))
                        .or_insert(address)
                        .clone();
                    info!("{} in {} reachable at {}", service, environment, address);
                    return Ok(address);
                }
                Ok(None) => debug!("{} in {} has no address yet", service, environment),
                Err(e) => warn!("Address lookup for {} in {} failed: {}", service, environment, e),
            }

            if !deadline.wait_next().await {
                return Err(ResolveError::Timeout {
                    environment,
                    service,
                    waited: self.timeout,
                });
            }
        }
    }

    /// Drops a cached address so the next call asks the provider again
    pub async fn invalidate(&self, environment: Environment, service: Service) {
        self.resolved.lock().await.remove(&(environment, service));
    }
}
