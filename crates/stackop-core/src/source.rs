//! Source control contract: materialize a project at a revision.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::{Error, Result};

/// Revision of the project repository to check out.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Revision {
    /// Whatever the remote's HEAD points at.
    DefaultBranch,
    /// A branch, stored without any `refs/heads/` prefix.
    Branch(String),
    /// A commit hash; the checkout is left with a detached HEAD.
    Commit(String),
}

impl Revision {
    /// Build a revision from the optional branch and commit fields of a spec.
    pub fn from_parts(branch: Option<&str>, commit: Option<&str>) -> Result<Self> {
        let branch = branch.map(str::trim).filter(|b| !b.is_empty());
        let commit = commit.map(str::trim).filter(|c| !c.is_empty());

        match (branch, commit) {
            (Some(_), Some(_)) => Err(Error::Config(
                "branch and commit are mutually exclusive".to_string(),
            )),
            (Some(branch), None) => {
                let name = branch.strip_prefix("refs/heads/").unwrap_or(branch);
                Ok(Revision::Branch(name.to_string()))
            }
            (None, Some(commit)) => Ok(Revision::Commit(commit.to_string())),
            (None, None) => Ok(Revision::DefaultBranch),
        }
    }

    /// The commit this revision pins, if any.
    pub fn pinned_commit(&self) -> Option<&str> {
        match self {
            Revision::Commit(sha) => Some(sha),
            _ => None,
        }
    }
}

impl std::fmt::Display for Revision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Revision::DefaultBranch => write!(f, "default branch"),
            Revision::Branch(name) => write!(f, "branch {name}"),
            Revision::Commit(sha) => write!(f, "commit {sha}"),
        }
    }
}

/// Resolved credentials for a remote repository.
#[derive(Clone, PartialEq, Eq)]
pub enum GitCredentials {
    AccessToken(String),
    SshKey {
        private_key: String,
        passphrase: Option<String>,
    },
    Basic {
        username: String,
        password: String,
    },
}

impl GitCredentials {
    pub fn method(&self) -> &'static str {
        match self {
            GitCredentials::AccessToken(_) => "access-token",
            GitCredentials::SshKey { .. } => "ssh-key",
            GitCredentials::Basic { .. } => "basic",
        }
    }

    /// Secret material that must never appear in logs or surfaced errors.
    pub fn secrets(&self) -> Vec<&str> {
        match self {
            GitCredentials::AccessToken(token) => vec![token.as_str()],
            GitCredentials::SshKey {
                private_key,
                passphrase,
            } => {
                let mut out = vec![private_key.as_str()];
                out.extend(passphrase.as_deref());
                out
            }
            GitCredentials::Basic { password, .. } => vec![password.as_str()],
        }
    }
}

impl std::fmt::Debug for GitCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "GitCredentials({})", self.method())
    }
}

/// Everything needed to produce a checkout.
#[derive(Debug, Clone)]
pub struct SourceRequest {
    pub repo_url: String,
    pub revision: Revision,
    /// Subdirectory holding the project descriptor.
    pub repo_dir: Option<String>,
    pub credentials: Option<GitCredentials>,
}

/// A local checkout of the project source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Checkout {
    /// Repository root on disk.
    pub root: PathBuf,
    /// Directory holding the project descriptor (root or `repo_dir` below it).
    pub work_dir: PathBuf,
    /// Commit hash actually checked out.
    pub commit: String,
}

/// Materializes project source for one reconcile attempt.
#[async_trait]
pub trait SourcePreparer: Send + Sync {
    /// Name of this preparer.
    fn name(&self) -> &'static str;

    /// Produce a fresh checkout for the request.
    async fn prepare(&self, request: &SourceRequest) -> Result<Checkout>;

    /// Drop a checkout once the attempt is over.
    async fn release(&self, _checkout: &Checkout) -> Result<()> {
        Ok(())
    }
}
