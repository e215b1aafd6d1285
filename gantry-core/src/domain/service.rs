//! Deployable services and their dependency graph

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// A deployable unit of the application
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Service {
    BackendApi,
    Frontend,
}

impl Service {
    pub const ALL: [Service; 2] = [Service::BackendApi, Service::Frontend];

    pub fn as_str(&self) -> &'static str {
        match self {
            Service::BackendApi => "backend-api",
            Service::Frontend => "frontend",
        }
    }
}

impl fmt::Display for Service {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Service {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "backend-api" | "backend" => Ok(Service::BackendApi),
            "frontend" => Ok(Service::Frontend),
            other => Err(format!("unknown service '{}'", other)),
        }
    }
}

/// Build and exposure settings of one service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceSpec {
    pub service: Service,

    /// Directory handed to the build service as build context
    pub build_context: String,

    /// Services that must be deployed (and discovered) before this one
    pub depends_on: Vec<Service>,

    /// Whether the service gets an externally routable address
    pub exposed: bool,

    /// Build argument under which dependants receive this service's address
    pub address_key: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CatalogError {
    #[error("service {0} is declared more than once")]
    Duplicate(Service),

    #[error("service {service} depends on {dependency}, which is not in the catalog")]
    UnknownDependency {
        service: Service,
        dependency: Service,
    },

    #[error("dependency cycle between services: {0:?}")]
    Cycle(Vec<Service>),
}

/// Fixed set of services with a validated, acyclic dependency graph
///
/// The deploy order is computed once at construction; the catalog cannot be
/// changed afterwards.
#[derive(Debug, Clone)]
pub struct ServiceCatalog {
    specs: BTreeMap<Service, ServiceSpec>,
    order: Vec<Service>,
}

impl ServiceCatalog {
    pub fn new(specs: Vec<ServiceSpec>) -> Result<Self, CatalogError> {
        let mut by_service = BTreeMap::new();
        for spec in specs {
            let service = spec.service;
            if by_service.insert(service, spec).is_some() {
                return Err(CatalogError::Duplicate(service));
            }
        }

        let order = topological_order(&by_service)?;
        Ok(Self {
            specs: by_service,
            order,
        })
    }

    /// The e-commerce application: a backend API and a frontend talking to it
    pub fn standard() -> Self {
        Self::new(vec![
            ServiceSpec {
                service: Service::BackendApi,
                build_context: "backend".to_string(),
                depends_on: vec![],
                exposed: true,
                address_key: Some("BACKEND_API_URL".to_string()),
            },
            ServiceSpec {
                service: Service::Frontend,
                build_context: "frontend".to_string(),
                depends_on: vec![Service::BackendApi],
                exposed: true,
                address_key: None,
            },
        ])
        .expect("standard catalog is acyclic")
    }

    pub fn spec(&self, service: Service) -> Option<&ServiceSpec> {
        self.specs.get(&service)
    }

    pub fn contains(&self, service: Service) -> bool {
        self.specs.contains_key(&service)
    }

    /// Services ordered so every dependency precedes its dependants
    pub fn deploy_order(&self) -> &[Service] {
        &self.order
    }

    /// Mirror image of the deploy order: dependants first
    pub fn rollback_order(&self) -> Vec<Service> {
        self.order.iter().rev().copied().collect()
    }

    /// Whether any service deployed after `service` depends on it
    pub fn has_dependants(&self, service: Service) -> bool {
        self.specs
            .values()
            .any(|spec| spec.depends_on.contains(&service))
    }

    pub fn is_exposed(&self, service: Service) -> bool {
        self.spec(service).is_some_and(|s| s.exposed)
    }
}

/// Kahn's algorithm; ties are broken by enum order so the result is stable
fn topological_order(
    specs: &BTreeMap<Service, ServiceSpec>,
) -> Result<Vec<Service>, CatalogError> {
    let mut in_degree: BTreeMap<Service, usize> = BTreeMap::new();
    for spec in specs.values() {
        in_degree.entry(spec.service).or_insert(0);
        for dependency in &spec.depends_on {
            if !specs.contains_key(dependency) {
                return Err(CatalogError::UnknownDependency {
                    service: spec.service,
                    dependency: *dependency,
                });
            }
            *in_degree.entry(spec.service).or_insert(0) += 1;
        }
    }

    let mut ready: BTreeSet<Service> = in_degree
        .iter()
        .filter(|(_, degree)| **degree == 0)
        .map(|(service, _)| *service)
        .collect();
    let mut order = Vec::with_capacity(specs.len());

    while let Some(service) = ready.pop_first() {
        order.push(service);
        for spec in specs.values() {
            if spec.depends_on.contains(&service) {
                let degree = in_degree.entry(spec.service).or_insert(0);
                *degree -= 1;
                if *degree == 0 {
                    ready.insert(spec.service);
                }
            }
        }
    }

    if order.len() != specs.len() {
        let stuck = in_degree
            .into_iter()
            .filter(|(_, degree)| *degree > 0)
            .map(|(service, _)| service)
            .collect();
        return Err(CatalogError::Cycle(stuck));
    }

    Ok(order)
}
