//! Git credential resolution.
//!
//! Credentials come either from the structured `gitAuth` references or from
//! the legacy `gitAuthSecret`, a secret holding one of:
//! - `accessToken`
//! - `sshPrivateKey` and an optional `password`
//! - `username` and `password`

use stackop_config::Resolver;
use stackop_core::ResourceRef;
use stackop_core::source::GitCredentials;
use stackop_core::stack::{GitAuthConfig, StackSpec};
use stackop_core::{Error, Result};
use std::collections::BTreeMap;
use tracing::debug;

/// Resolve the credentials a spec asks for. `None` means anonymous access.
///
/// Any failure, including a missing secret, is reported as an `Auth` error.
pub async fn resolve_credentials(
    spec: &StackSpec,
    resolver: &Resolver,
    namespace: &str,
) -> Result<Option<GitCredentials>> {
    let credentials = match (&spec.git_auth, &spec.git_auth_secret) {
        (Some(_), Some(_)) => {
            return Err(Error::Auth(
                "gitAuth and gitAuthSecret are mutually exclusive".to_string(),
            ));
        }
        (Some(auth), None) => Some(from_refs(auth, resolver).await?),
        (None, Some(secret)) => {
            let data = resolver
                .secrets()
                .get_secret(namespace, secret)
                .await
                .map_err(|e| Error::Auth(format!("reading git auth secret: {e}")))?;
            Some(from_secret_data(secret, data)?)
        }
        (None, None) => None,
    };

    if let Some(creds) = &credentials {
        debug!(method = creds.method(), "Resolved git credentials");
    }
    Ok(credentials)
}

async fn from_refs(auth: &GitAuthConfig, resolver: &Resolver) -> Result<GitCredentials> {
    auth.validate().map_err(|e| Error::Auth(e.to_string()))?;

    if let Some(token) = &auth.access_token {
        return Ok(GitCredentials::AccessToken(
            resolve(resolver, "access token", token).await?,
        ));
    }

    if let Some(ssh) = &auth.ssh_auth {
        let private_key = resolve(resolver, "ssh private key", &ssh.ssh_private_key).await?;
        let passphrase = match &ssh.password {
            Some(password) => Some(resolve(resolver, "ssh key password", password).await?),
            None => None,
        };
        return Ok(GitCredentials::SshKey {
            private_key,
            passphrase,
        });
    }

    match &auth.basic_auth {
        Some(basic) => Ok(GitCredentials::Basic {
            username: resolve(resolver, "username", &basic.user_name).await?,
            password: resolve(resolver, "password", &basic.password).await?,
        }),
        None => Err(Error::Auth("no git authentication method set".to_string())),
    }
}

async fn resolve(resolver: &Resolver, what: &str, reference: &ResourceRef) -> Result<String> {
    resolver
        .resolve(reference)
        .await
        .map_err(|e| Error::Auth(format!("resolving {what}: {e}")))
}

fn from_secret_data(secret: &str, mut data: BTreeMap<String, String>) -> Result<GitCredentials> {
    let non_empty = |v: &Option<String>| v.as_deref().is_some_and(|s| !s.is_empty());

    let token = data.remove("accessToken");
    let ssh_key = data.remove("sshPrivateKey");
    let username = data.remove("username");
    let password = data.remove("password");

    let mut usable = Vec::new();
    if non_empty(&token) {
        usable.push("accessToken");
    }
    if non_empty(&ssh_key) {
        usable.push("sshPrivateKey");
    }
    if non_empty(&username) && non_empty(&password) {
        usable.push("username/password");
    }

    match usable.as_slice() {
        ["accessToken"] => Ok(GitCredentials::AccessToken(token.unwrap_or_default())),
        ["sshPrivateKey"] => Ok(GitCredentials::SshKey {
            private_key: ssh_key.unwrap_or_default(),
            passphrase: password.filter(|p| !p.is_empty()),
        }),
        ["username/password"] => Ok(GitCredentials::Basic {
            username: username.unwrap_or_default(),
            password: password.unwrap_or_default(),
        }),
        [] => Err(Error::Auth(format!(
            "secret {secret} holds no usable git authentication method"
        ))),
        many => Err(Error::Auth(format!(
            "secret {secret} holds more than one git authentication method: {}",
            many.join(", ")
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stackop_core::secret::MemorySecretStore;
    use stackop_core::stack::{BasicAuthConfig, SshAuthConfig};
    use std::sync::Arc;

    fn resolver(store: MemorySecretStore) -> Resolver {
        Resolver::new(Arc::new(store)).with_env(BTreeMap::from([(
            "GIT_TOKEN".to_string(),
            "ghp_123".to_string(),
        )]))
    }

    fn spec() -> StackSpec {
        StackSpec {
            stack: "acme/app".into(),
            project_repo: "https://github.com/acme/app".into(),
            ..StackSpec::default()
        }
    }

    #[tokio::test]
    async fn test_anonymous_when_nothing_configured() {
        let creds = resolve_credentials(&spec(), &resolver(MemorySecretStore::new()), "default")
            .await
            .unwrap();
        assert!(creds.is_none());
    }

    #[tokio::test]
    async fn test_structured_access_token() {
        let spec = StackSpec {
            git_auth: Some(GitAuthConfig {
                access_token: Some(ResourceRef::env("GIT_TOKEN")),
                ..GitAuthConfig::default()
            }),
            ..spec()
        };

        let creds = resolve_credentials(&spec, &resolver(MemorySecretStore::new()), "default")
            .await
            .unwrap();
        assert_eq!(creds, Some(GitCredentials::AccessToken("ghp_123".into())));
    }

    #[tokio::test]
    async fn test_structured_ssh_and_basic() {
        let store = MemorySecretStore::new().with_secret(
            "infra",
            "deploy-key",
            [("key", "-----BEGIN KEY-----"), ("pass", "phrase")],
        );
        let r = resolver(store);

        let ssh = StackSpec {
            git_auth: Some(GitAuthConfig {
                ssh_auth: Some(SshAuthConfig {
                    ssh_private_key: ResourceRef::secret(Some("infra".into()), "deploy-key", "key"),
                    password: Some(ResourceRef::secret(
                        Some("infra".into()),
                        "deploy-key",
                        "pass",
                    )),
                }),
                ..GitAuthConfig::default()
            }),
            ..spec()
        };
        let creds = resolve_credentials(&ssh, &r, "default").await.unwrap();
        assert_eq!(
            creds,
            Some(GitCredentials::SshKey {
                private_key: "-----BEGIN KEY-----".into(),
                passphrase: Some("phrase".into()),
            })
        );

        let basic = StackSpec {
            git_auth: Some(GitAuthConfig {
                basic_auth: Some(BasicAuthConfig {
                    user_name: ResourceRef::literal("bot"),
                    password: ResourceRef::env("GIT_TOKEN"),
                }),
                ..GitAuthConfig::default()
            }),
            ..spec()
        };
        let creds = resolve_credentials(&basic, &r, "default").await.unwrap();
        assert_eq!(
            creds,
            Some(GitCredentials::Basic {
                username: "bot".into(),
                password: "ghp_123".into(),
            })
        );
    }

    #[tokio::test]
    async fn test_unresolvable_reference_is_auth_error() {
        let spec = StackSpec {
            git_auth: Some(GitAuthConfig {
                access_token: Some(ResourceRef::env("MISSING_TOKEN")),
                ..GitAuthConfig::default()
            }),
            ..spec()
        };

        let err = resolve_credentials(&spec, &resolver(MemorySecretStore::new()), "default")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Auth(_)));
    }

    #[tokio::test]
    async fn test_legacy_secret() {
        let store = MemorySecretStore::new()
            .with_secret("default", "token-auth", [("accessToken", "ghp_abc")])
            .with_secret(
                "default",
                "basic-auth",
                [("username", "bot"), ("password", "pw")],
            )
            .with_secret(
                "default",
                "ambiguous",
                [("accessToken", "ghp_abc"), ("sshPrivateKey", "KEY")],
            );
        let r = resolver(store);

        let token = StackSpec {
            git_auth_secret: Some("token-auth".into()),
            ..spec()
        };
        assert_eq!(
            resolve_credentials(&token, &r, "default").await.unwrap(),
            Some(GitCredentials::AccessToken("ghp_abc".into()))
        );

        let basic = StackSpec {
            git_auth_secret: Some("basic-auth".into()),
            ..spec()
        };
        assert!(matches!(
            resolve_credentials(&basic, &r, "default").await.unwrap(),
            Some(GitCredentials::Basic { .. })
        ));

        let ambiguous = StackSpec {
            git_auth_secret: Some("ambiguous".into()),
            ..spec()
        };
        assert!(matches!(
            resolve_credentials(&ambiguous, &r, "default").await,
            Err(Error::Auth(_))
        ));

        let missing = StackSpec {
            git_auth_secret: Some("nope".into()),
            ..spec()
        };
        assert!(matches!(
            resolve_credentials(&missing, &r, "default").await,
            Err(Error::Auth(_))
        ));
    }
}
