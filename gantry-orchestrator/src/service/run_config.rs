//! Per-run configuration handed to the artifact builder
//!
//! Discovered addresses are merged by producing a new value; a stage never
//! sees configuration mutated behind its back by a later stage.

use gantry_core::domain::address::Address;
use gantry_core::domain::environment::Environment;
use gantry_core::domain::service::{Service, ServiceCatalog, ServiceSpec};
use std::collections::BTreeMap;

pub const ENVIRONMENT_BUILD_ARG: &str = "GANTRY_ENVIRONMENT";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunConfig {
    environment: Environment,
    addresses: BTreeMap<Service, Address>,
}

impl RunConfig {
    pub fn new(environment: Environment) -> Self {
        Self {
            environment,
            addresses: BTreeMap::new(),
        }
    }

    pub fn environment(&self) -> Environment {
        self.environment
    }

    pub fn address(&self, service: Service) -> Option<&Address> {
        self.addresses.get(&service)
    }

    /// Copy of this configuration that also knows `service`'s address
    pub fn with_address(&self, service: Service, address: Address) -> Self {
        let mut addresses = self.addresses.clone();
        addresses.insert(service, address);
        Self {
            environment: self.environment,
            addresses,
        }
    }

    /// Build arguments for `spec`: the environment plus the URL of every
    /// resolved dependency that declares an address key
    pub fn build_args_for(
        &self,
        spec: &ServiceSpec,
        catalog: &ServiceCatalog,
    ) -> BTreeMap<String, String> {
        let mut args = BTreeMap::new();
        args.insert(
            ENVIRONMENT_BUILD_ARG.to_string(),
            self.environment.to_string(),
        );

        for dependency in &spec.depends_on {
            let key = catalog
                .spec(*dependency)
                .and_then(|dep| dep.address_key.as_ref());
            if let (Some(key), Some(address)) = (key, self.address(*dependency)) {
                args.insert(key.clone(), address.url());
            }
        }

        args
    }
}
