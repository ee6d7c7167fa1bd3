//! Stack resource types: desired state, observed status and update classification.

use chrono::{DateTime, Utc};
use derive_more::Display;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::registry::TypedResource;
use crate::resource::ResourceRef;
use crate::source::Revision;
use crate::{Error, Result};

/// A Stack resource as held by the declarative store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Stack {
    pub api_version: String,
    pub kind: String,
    #[serde(default)]
    pub metadata: ObjectMeta,
    pub spec: StackSpec,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<StackStatus>,
}

impl TypedResource for Stack {
    const API_VERSION: &'static str = "pulumi.com/v1alpha1";
    const KIND: &'static str = "Stack";
}

impl Stack {
    pub fn new(name: impl Into<String>, namespace: impl Into<String>, spec: StackSpec) -> Self {
        Self {
            api_version: Self::API_VERSION.to_string(),
            kind: Self::KIND.to_string(),
            metadata: ObjectMeta {
                name: Some(name.into()),
                namespace: Some(namespace.into()),
                ..ObjectMeta::default()
            },
            spec,
            status: None,
        }
    }

    /// Identity of this resource in the declarative store.
    pub fn key(&self) -> StackKey {
        StackKey {
            namespace: self
                .metadata
                .namespace
                .clone()
                .unwrap_or_else(|| DEFAULT_NAMESPACE.to_string()),
            name: self.metadata.name.clone().unwrap_or_default(),
        }
    }

    /// Whether the resource has been marked for deletion and awaits finalization.
    pub fn is_being_deleted(&self) -> bool {
        self.metadata.deletion_timestamp.is_some()
    }
}

/// Store namespace of a Stack whose metadata names none.
pub const DEFAULT_NAMESPACE: &str = "default";

/// Store identity of a Stack resource (`namespace/name`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Display)]
#[display("{namespace}/{name}")]
pub struct StackKey {
    pub namespace: String,
    pub name: String,
}

impl StackKey {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl std::str::FromStr for StackKey {
    type Err = Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.split_once('/') {
            Some((ns, name)) if !ns.is_empty() && !name.is_empty() => Ok(Self::new(ns, name)),
            None if !s.is_empty() => Ok(Self::new(DEFAULT_NAMESPACE, s)),
            _ => Err(Error::Config(format!("invalid stack key: {s:?}"))),
        }
    }
}

/// Desired state of a stack managed by the operator.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StackSpec {
    // Auth and environment
    /// Deprecated: secret whose `accessToken` key is exported as the engine access token.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_token_secret: Option<String>,
    /// Names of config maps whose entries are exported into the run environment.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub envs: Vec<String>,
    /// Environment variables loaded from resource references.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub env_refs: BTreeMap<String, ResourceRef>,
    /// Names of secrets whose entries are exported into the run environment.
    #[serde(default, rename = "envSecrets", skip_serializing_if = "Vec::is_empty")]
    pub secret_envs: Vec<String>,
    /// State backend URL, e.g. `https://app.pulumi.com` or `s3://bucket`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backend: Option<String>,

    // Stack identity and configuration
    /// Fully qualified stack name (`org/stack`).
    pub stack: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub config: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub config_refs: BTreeMap<String, ResourceRef>,
    /// Deprecated: inline secret configuration.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub secrets: BTreeMap<String, String>,
    #[serde(default, rename = "secretsRef", skip_serializing_if = "BTreeMap::is_empty")]
    pub secret_refs: BTreeMap<String, ResourceRef>,
    /// Encryption provider used when the stack is created.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secrets_provider: Option<String>,

    // Source control
    pub project_repo: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub git_auth: Option<GitAuthConfig>,
    /// Deprecated: secret holding one git authentication method.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub git_auth_secret: Option<String>,
    /// Directory of the project descriptor within the repository.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repo_dir: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub commit: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch: Option<String>,

    // Lifecycle
    #[serde(default)]
    pub refresh: bool,
    #[serde(default)]
    pub expect_no_refresh_changes: bool,
    #[serde(default)]
    pub destroy_on_finalize: bool,
    #[serde(default)]
    pub retry_on_update_conflict: bool,
}

impl StackSpec {
    /// The revision to deploy. Branch and commit are mutually exclusive.
    pub fn revision(&self) -> Result<Revision> {
        Revision::from_parts(self.branch.as_deref(), self.commit.as_deref())
    }

    /// Check everything that can be checked without touching a backend.
    pub fn validate(&self) -> Result<()> {
        if self.stack.trim().is_empty() {
            return Err(Error::Config("stack name is required".to_string()));
        }
        if self.project_repo.trim().is_empty() {
            return Err(Error::Config("projectRepo is required".to_string()));
        }
        self.revision()?;

        let refs = self
            .env_refs
            .values()
            .chain(self.config_refs.values())
            .chain(self.secret_refs.values());
        for r in refs {
            r.validate()?;
        }

        if let Some(auth) = &self.git_auth {
            auth.validate()?;
            if self.git_auth_secret.is_some() {
                return Err(Error::Config(
                    "gitAuth and gitAuthSecret are mutually exclusive".to_string(),
                ));
            }
        }

        Ok(())
    }
}

/// Git authentication through resource references. Exactly one method must be set.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GitAuthConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_token: Option<ResourceRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ssh_auth: Option<SshAuthConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub basic_auth: Option<BasicAuthConfig>,
}

impl GitAuthConfig {
    pub fn validate(&self) -> Result<()> {
        let methods = [
            self.access_token.is_some(),
            self.ssh_auth.is_some(),
            self.basic_auth.is_some(),
        ]
        .into_iter()
        .filter(|set| *set)
        .count();

        if methods != 1 {
            return Err(Error::Config(format!(
                "gitAuth must set exactly one of accessToken, sshAuth, basicAuth (found {methods})"
            )));
        }

        if let Some(token) = &self.access_token {
            token.validate()?;
        }
        if let Some(ssh) = &self.ssh_auth {
            ssh.ssh_private_key.validate()?;
            if let Some(password) = &ssh.password {
                password.validate()?;
            }
        }
        if let Some(basic) = &self.basic_auth {
            basic.user_name.validate()?;
            basic.password.validate()?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SshAuthConfig {
    pub ssh_private_key: ResourceRef,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<ResourceRef>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BasicAuthConfig {
    pub user_name: ResourceRef,
    pub password: ResourceRef,
}

/// One effective configuration entry handed to the engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigValue {
    pub value: String,
    /// Secret values are encrypted by the engine.
    #[serde(default)]
    pub secret: bool,
}

impl ConfigValue {
    pub fn plain(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            secret: false,
        }
    }

    pub fn secret(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            secret: true,
        }
    }
}

/// Effective stack configuration keyed by config key. Ordered so that two
/// configurations with the same entries compare and serialize identically.
pub type StackConfig = BTreeMap<String, ConfigValue>;

/// Exported stack outputs. Values are opaque JSON.
pub type StackOutputs = BTreeMap<String, serde_json::Value>;

/// URL of the engine's detail page for one operation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Display)]
#[serde(transparent)]
#[display("{_0}")]
pub struct Permalink(String);

impl Permalink {
    pub fn new(url: impl Into<String>) -> Self {
        Self(url.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Observed state of a stack.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StackStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outputs: Option<StackOutputs>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_update: Option<StackUpdateState>,
}

impl StackStatus {
    pub fn last_successful_commit(&self) -> Option<&str> {
        self.last_update
            .as_ref()
            .and_then(|u| u.last_successful_commit.as_deref())
    }
}

/// Persisted record of the last update attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StackUpdateState {
    pub state: UpdateState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_attempted_commit: Option<String>,
    /// Only advanced by successful attempts.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_successful_commit: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub permalink: Option<Permalink>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_resync_time: Option<DateTime<Utc>>,
}

/// State message stored in [`StackUpdateState`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UpdateState {
    Succeeded,
    Failed,
}

impl std::fmt::Display for UpdateState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            UpdateState::Succeeded => write!(f, "succeeded"),
            UpdateState::Failed => write!(f, "failed"),
        }
    }
}

/// Terminal classification of one update attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum StackUpdateStatus {
    Succeeded,
    Failed,
    /// Another update is in progress for the same stack.
    Conflict,
    /// The engine refuses to update until pending operations are resolved.
    PendingOperations,
    /// The stack does not exist in the backend.
    NotFound,
}

impl StackUpdateStatus {
    /// Classify an engine error. Errors outside the engine taxonomy are failures.
    pub fn from_error(err: &Error) -> Self {
        match err {
            Error::EngineConflict(_) => StackUpdateStatus::Conflict,
            Error::EnginePendingOperations(_) => StackUpdateStatus::PendingOperations,
            Error::NotFound(_) => StackUpdateStatus::NotFound,
            _ => StackUpdateStatus::Failed,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, StackUpdateStatus::Succeeded)
    }

    /// Only a concurrent-update conflict may be retried automatically.
    pub fn is_retryable(&self) -> bool {
        matches!(self, StackUpdateStatus::Conflict)
    }

    /// State message persisted for this classification.
    pub fn state(&self) -> UpdateState {
        if self.is_success() {
            UpdateState::Succeeded
        } else {
            UpdateState::Failed
        }
    }
}

impl std::fmt::Display for StackUpdateStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StackUpdateStatus::Succeeded => write!(f, "succeeded"),
            StackUpdateStatus::Failed => write!(f, "failed"),
            StackUpdateStatus::Conflict => write!(f, "conflict"),
            StackUpdateStatus::PendingOperations => write!(f, "pendingOperations"),
            StackUpdateStatus::NotFound => write!(f, "notFound"),
        }
    }
}
