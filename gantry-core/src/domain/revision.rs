//! Source revisions

use serde::{Deserialize, Serialize};
use std::fmt;

/// Point-in-time source state that triggered a run
///
/// Immutable once created: fields are private and only readable.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Revision {
    commit: String,
    branch: String,
}

impl Revision {
    /// Creates a revision after validating the commit hash and branch name
    pub fn new(commit: impl Into<String>, branch: impl Into<String>) -> Result<Self, String> {
        let commit = commit.into().trim().to_ascii_lowercase();
        let branch = branch.into().trim().to_string();

        if commit.len() < 7 || !commit.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(format!(
                "commit '{}' is not a hexadecimal hash of at least 7 characters",
                commit
            ));
        }

        if branch.is_empty() {
            return Err("branch cannot be empty".to_string());
        }

        Ok(Self { commit, branch })
    }

    pub fn commit(&self) -> &str {
        &self.commit
    }

    pub fn branch(&self) -> &str {
        &self.branch
    }

    /// First 12 characters of the commit, used in image tags
    pub fn short_commit(&self) -> &str {
        &self.commit[..self.commit.len().min(12)]
    }
}

impl fmt::Display for Revision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.branch, self.short_commit())
    }
}
