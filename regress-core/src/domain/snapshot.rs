//! Snapshot domain types
//!
//! A snapshot is the pair of commits a job has to build: how the compiler
//! side is put together, and which proof-assistant commit sits underneath.

use serde::{Deserialize, Serialize};
use std::fmt;

/// How the compiler checkout for a job is assembled
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Integration {
    /// A branch build at a single commit
    Branch { commit: String },
    /// A pull request: `head` merged into `base`
    PullRequest { head: String, base: String },
}

impl Integration {
    /// Primary-branch builds are the only ones that publish artifacts
    pub fn is_primary(&self) -> bool {
        matches!(self, Integration::Branch { .. })
    }
}

impl fmt::Display for Integration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Integration::Branch { commit } => write!(f, "{}", commit),
            Integration::PullRequest { head, base } => write!(f, "{} merged into {}", head, base),
        }
    }
}

/// Commits a job must build
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    pub integration: Integration,
    /// Proof-assistant commit
    pub core: String,
}
