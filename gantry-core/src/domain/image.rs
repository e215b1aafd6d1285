//! Container image references

use serde::{Deserialize, Serialize};
use std::fmt;

use super::environment::Environment;
use super::revision::Revision;
use super::service::Service;

/// A built image of one service for one environment
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ImageReference {
    pub service: Service,
    pub environment: Environment,
    pub tag: String,
}

impl ImageReference {
    /// Derives the image reference for a pipeline run
    ///
    /// The tag combines the environment namespace, the revision and the run
    /// number, so no two runs ever produce the same tag.
    pub fn for_run(
        service: Service,
        environment: Environment,
        revision: &Revision,
        run_number: u64,
    ) -> Self {
        Self {
            service,
            environment,
            tag: format!(
                "{}-{}-r{}",
                environment.tag_namespace(),
                revision.short_commit(),
                run_number
            ),
        }
    }

    /// Repository path of the image inside the registry
    pub fn repository(&self) -> String {
        format!("gantry/{}", self.service)
    }
}

impl fmt::Display for ImageReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.repository(), self.tag)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tag_is_unique_per_run() {
        let revision = Revision::new("0123456789abcdef", "main").unwrap();
        let first = ImageReference::for_run(Service::Frontend, Environment::Production, &revision, 7);
        let second = ImageReference::for_run(Service::Frontend, Environment::Production, &revision, 8);

        assert_eq!(first.tag, "production-0123456789ab-r7");
        assert_ne!(first.tag, second.tag);
        assert_eq!(first.to_string(), "gantry/frontend:production-0123456789ab-r7");
    }
}
