//! Per-environment exclusive leases
//!
//! A run holds its environment's lease from the moment it starts until it
//! reaches a terminal state, so deployments to one environment never
//! interleave. Waiters are served in FIFO order.

use gantry_core::domain::environment::Environment;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::debug;

pub struct EnvironmentLeases {
    locks: HashMap<Environment, Arc<Mutex<()>>>,
}

/// Held lease; released on drop
#[derive(Debug)]
pub struct EnvironmentLease {
    environment: Environment,
    _guard: OwnedMutexGuard<()>,
}

impl EnvironmentLease {
    pub fn environment(&self) -> Environment {
        self.environment
    }
}

impl Drop for EnvironmentLease {
    fn drop(&mut self) {
        debug!("Released lease on {}", self.environment);
    }
}

impl EnvironmentLeases {
    pub fn new() -> Self {
        Self {
            locks: Environment::ALL
                .iter()
                .map(|env| (*env, Arc::new(Mutex::new(()))))
                .collect(),
        }
    }

    /// Waits until the environment is free and takes its lease
    pub async fn acquire(&self, environment: Environment) -> EnvironmentLease {
        let guard = self.lock(environment).lock_owned().await;
        debug!("Acquired lease on {}", environment);
        EnvironmentLease {
            environment,
            _guard: guard,
        }
    }

    /// Takes the lease only if nobody holds it
    pub fn try_acquire(&self, environment: Environment) -> Option<EnvironmentLease> {
        let guard = self.lock(environment).try_lock_owned().ok()?;
        Some(EnvironmentLease {
            environment,
            _guard: guard,
        })
    }

    fn lock(&self, environment: Environment) -> Arc<Mutex<()>> {
        // every environment gets a lock in new(); the fallback is never shared
        self.locks
            .get(&environment)
            .cloned()
            .unwrap_or_else(|| Arc::new(Mutex::new(())))
    }
}

impl Default for EnvironmentLeases {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_lease_is_exclusive_per_environment() {
        let leases = EnvironmentLeases::new();

        let staging = leases.acquire(Environment::Staging).await;
        assert!(leases.try_acquire(Environment::Staging).is_none());
        assert!(leases.try_acquire(Environment::Production).is_some());

        drop(staging);
        assert!(leases.try_acquire(Environment::Staging).is_some());
    }

    #[tokio::test]
    async fn test_waiter_gets_lease_after_release() {
        let leases = Arc::new(EnvironmentLeases::new());
        let held = leases.acquire(Environment::Production).await;

        let waiter = {
            let leases = leases.clone();
            tokio::spawn(async move { leases.acquire(Environment::Production).await.environment() })
        };
        tokio::task::yield_now().await;
        assert!(!waiter.is_finished());

        drop(held);
        assert_eq!(waiter.await.unwrap(), Environment::Production);
    }
}
