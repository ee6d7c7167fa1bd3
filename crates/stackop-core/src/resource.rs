//! Resource references: where a value should be loaded from.
//!
//! A reference is serialized with a `type` discriminant and exactly one payload
//! object named after the variant:
//!
//! ```json
//! {"type": "Env", "env": {"name": "AWS_REGION"}}
//! {"type": "FS", "filesystem": {"path": "/var/run/token"}}
//! {"type": "Secret", "secret": {"namespace": "ops", "name": "creds", "key": "token"}}
//! {"type": "Literal", "literal": {"value": "us-east-1"}}
//! ```

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Namespace used for secret selectors that do not name one.
pub const DEFAULT_SECRET_NAMESPACE: &str = "default";

/// A typed reference to a value held by one of the supported backends.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", try_from = "RawResourceRef")]
pub enum ResourceRef {
    /// An environment variable of the operator process.
    Env { env: EnvSelector },
    /// A file on the operator's filesystem.
    #[serde(rename = "FS")]
    FileSystem { filesystem: FsSelector },
    /// A key within a namespaced secret.
    Secret { secret: SecretSelector },
    /// An inline value.
    Literal { literal: LiteralRef },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvSelector {
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FsSelector {
    pub path: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecretSelector {
    /// Defaults to [`DEFAULT_SECRET_NAMESPACE`] when omitted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    pub name: String,
    pub key: String,
}

impl SecretSelector {
    pub fn namespace_or<'a>(&'a self, default: &'a str) -> &'a str {
        match self.namespace.as_deref() {
            Some(ns) if !ns.is_empty() => ns,
            _ => default,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LiteralRef {
    pub value: String,
}

/// Wire form of a [`ResourceRef`]: every payload optional, so that a
/// reference carrying more than one can be rejected.
#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct RawResourceRef {
    #[serde(rename = "type")]
    selector_type: String,
    env: Option<EnvSelector>,
    filesystem: Option<FsSelector>,
    secret: Option<SecretSelector>,
    literal: Option<LiteralRef>,
}

impl TryFrom<RawResourceRef> for ResourceRef {
    type Error = Error;

    fn try_from(raw: RawResourceRef) -> Result<Self> {
        let RawResourceRef {
            selector_type,
            env,
            filesystem,
            secret,
            literal,
        } = raw;

        let populated = [
            env.is_some(),
            filesystem.is_some(),
            secret.is_some(),
            literal.is_some(),
        ]
        .into_iter()
        .filter(|set| *set)
        .count();
        if populated > 1 {
            return Err(Error::Config(format!(
                "{selector_type} reference must carry exactly one selector, found {populated}"
            )));
        }

        let reference = match selector_type.as_str() {
            "Env" => env.map(|env| ResourceRef::Env { env }),
            "FS" => filesystem.map(|filesystem| ResourceRef::FileSystem { filesystem }),
            "Secret" => secret.map(|secret| ResourceRef::Secret { secret }),
            "Literal" => literal.map(|literal| ResourceRef::Literal { literal }),
            other => {
                return Err(Error::Config(format!("unknown reference type {other:?}")));
            }
        };
        reference.ok_or_else(|| {
            Error::Config(format!("{selector_type} reference has no matching selector"))
        })
    }
}

impl ResourceRef {
    pub fn env(name: impl Into<String>) -> Self {
        Self::Env {
            env: EnvSelector { name: name.into() },
        }
    }

    pub fn file(path: impl Into<String>) -> Self {
        Self::FileSystem {
            filesystem: FsSelector { path: path.into() },
        }
    }

    pub fn secret(
        namespace: Option<String>,
        name: impl Into<String>,
        key: impl Into<String>,
    ) -> Self {
        Self::Secret {
            secret: SecretSelector {
                namespace,
                name: name.into(),
                key: key.into(),
            },
        }
    }

    pub fn literal(value: impl Into<String>) -> Self {
        Self::Literal {
            literal: LiteralRef {
                value: value.into(),
            },
        }
    }

    /// The selector type as it appears in manifests.
    pub fn selector_type(&self) -> &'static str {
        match self {
            ResourceRef::Env { .. } => "Env",
            ResourceRef::FileSystem { .. } => "FS",
            ResourceRef::Secret { .. } => "Secret",
            ResourceRef::Literal { .. } => "Literal",
        }
    }

    /// Reject references whose payload cannot address anything.
    pub fn validate(&self) -> Result<()> {
        let missing = match self {
            ResourceRef::Env { env } if env.name.trim().is_empty() => Some("env.name"),
            ResourceRef::FileSystem { filesystem } if filesystem.path.trim().is_empty() => {
                Some("filesystem.path")
            }
            ResourceRef::Secret { secret } if secret.name.trim().is_empty() => Some("secret.name"),
            ResourceRef::Secret { secret } if secret.key.trim().is_empty() => Some("secret.key"),
            _ => None,
        };

        match missing {
            Some(field) => Err(Error::Config(format!(
                "malformed {} reference: {} is empty",
                self.selector_type(),
                field
            ))),
            None => Ok(()),
        }
    }
}

impl std::fmt::Display for ResourceRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ResourceRef::Env { env } => write!(f, "env:{}", env.name),
            ResourceRef::FileSystem { filesystem } => write!(f, "fs:{}", filesystem.path),
            ResourceRef::Secret { secret } => write!(
                f,
                "secret:{}/{}#{}",
                secret.namespace_or(DEFAULT_SECRET_NAMESPACE),
                secret.name,
                secret.key
            ),
            // Never print literal values, they may be secret material.
            ResourceRef::Literal { .. } => write!(f, "literal"),
        }
    }
}
