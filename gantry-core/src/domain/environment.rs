//! Deployment environments
//!
//! The set of environments is fixed. Each one owns its cluster target, its
//! approval policy and its image-tag namespace.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Target environment of a pipeline run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Environment {
    Staging,
    Production,
}

impl Environment {
    /// Every environment, in promotion order
    pub const ALL: [Environment; 2] = [Environment::Staging, Environment::Production];

    pub fn as_str(&self) -> &'static str {
        match self {
            Environment::Staging => "staging",
            Environment::Production => "production",
        }
    }

    /// Name of the cluster this environment deploys into
    pub fn cluster(&self) -> &'static str {
        match self {
            Environment::Staging => "gantry-staging",
            Environment::Production => "gantry-production",
        }
    }

    /// Prefix of every image tag built for this environment
    pub fn tag_namespace(&self) -> &'static str {
        self.as_str()
    }

    /// Whether a human must sign off before the first stage runs
    pub fn requires_approval(&self) -> bool {
        matches!(self, Environment::Production)
    }

    /// Whether a failed run is rolled back without operator action
    ///
    /// Staging failures are expected while iterating and are only surfaced.
    pub fn rolls_back_automatically(&self) -> bool {
        matches!(self, Environment::Production)
    }

    /// Whether scanner findings stop the stage instead of being logged
    pub fn blocks_on_scan_findings(&self) -> bool {
        matches!(self, Environment::Production)
    }

    /// Whether the given source branch may be deployed here
    ///
    /// `develop` (and release branches) feed staging, only `main` feeds production.
    pub fn accepts_branch(&self, branch: &str) -> bool {
        match self {
            Environment::Staging => branch == "develop" || branch.starts_with("release/"),
            Environment::Production => branch == "main",
        }
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Environment {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "staging" => Ok(Environment::Staging),
            "production" | "prod" => Ok(Environment::Production),
            other => Err(format!("unknown environment '{}'", other)),
        }
    }
}
