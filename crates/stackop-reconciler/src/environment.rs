//! Environment handed to every engine invocation of an attempt.

use stackop_config::Resolver;
use stackop_core::stack::StackSpec;
use stackop_core::{Error, Result};
use std::collections::BTreeMap;
use tracing::debug;

pub const BACKEND_URL_VAR: &str = "PULUMI_BACKEND_URL";
pub const ACCESS_TOKEN_VAR: &str = "PULUMI_ACCESS_TOKEN";
const ACCESS_TOKEN_KEY: &str = "accessToken";

/// Build the run environment of a stack.
///
/// Sources are applied in order, later ones overriding earlier ones:
/// `backend`, `accessTokenSecret`, `envs` config maps, `envSecrets` secrets,
/// then `envRefs`. A source that cannot be found fails the attempt.
pub async fn build_environment(
    spec: &StackSpec,
    namespace: &str,
    resolver: &Resolver,
) -> Result<BTreeMap<String, String>> {
    let mut env = BTreeMap::new();
    let store = resolver.secrets();

    if let Some(backend) = spec.backend.as_deref().filter(|b| !b.is_empty()) {
        env.insert(BACKEND_URL_VAR.to_string(), backend.to_string());
    }

    if let Some(secret) = &spec.access_token_secret {
        let token = store
            .get_key(namespace, secret, ACCESS_TOKEN_KEY)
            .await
            .map_err(|e| within("accessTokenSecret", e))?;
        env.insert(ACCESS_TOKEN_VAR.to_string(), token);
    }

    for name in &spec.envs {
        let data = store
            .get_config_map(namespace, name)
            .await
            .map_err(|e| within("envs", e))?;
        env.extend(data);
    }

    for name in &spec.secret_envs {
        let data = store
            .get_secret(namespace, name)
            .await
            .map_err(|e| within("envSecrets", e))?;
        env.extend(data);
    }

    let refs = resolver
        .resolve_map(&spec.env_refs)
        .await
        .map_err(|e| within("envRefs", e))?;
    env.extend(refs);

    debug!(vars = env.len(), "Built run environment");
    Ok(env)
}

fn within(field: &str, err: Error) -> Error {
    match err {
        Error::NotFound(m) => Error::NotFound(format!("{field}: {m}")),
        Error::AccessDenied(m) => Error::AccessDenied(format!("{field}: {m}")),
        Error::Io(m) => Error::Io(format!("{field}: {m}")),
        Error::Config(m) => Error::Config(format!("{field}: {m}")),
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stackop_core::ResourceRef;
    use stackop_core::secret::MemorySecretStore;
    use std::sync::Arc;

    fn resolver(store: MemorySecretStore) -> Resolver {
        Resolver::new(Arc::new(store))
            .with_default_namespace("infra")
            .with_env(BTreeMap::from([("CI".to_string(), "true".to_string())]))
    }

    #[tokio::test]
    async fn test_sources_apply_in_order() {
        let store = MemorySecretStore::new()
            .with_secret("infra", "pulumi-token", [("accessToken", "pul-123")])
            .with_config_map("infra", "aws", [("AWS_REGION", "us-east-1"), ("LOG", "info")])
            .with_secret("infra", "aws-creds", [("AWS_SECRET_ACCESS_KEY", "s3cr3t"), ("LOG", "debug")]);

        let spec = StackSpec {
            backend: Some("s3://state-bucket".into()),
            access_token_secret: Some("pulumi-token".into()),
            envs: vec!["aws".into()],
            secret_envs: vec!["aws-creds".into()],
            env_refs: BTreeMap::from([
                ("LOG".to_string(), ResourceRef::literal("trace")),
                ("IN_CI".to_string(), ResourceRef::env("CI")),
            ]),
            ..StackSpec::default()
        };

        let env = build_environment(&spec, "infra", &resolver(store)).await.unwrap();
        assert_eq!(env[BACKEND_URL_VAR], "s3://state-bucket");
        assert_eq!(env[ACCESS_TOKEN_VAR], "pul-123");
        assert_eq!(env["AWS_REGION"], "us-east-1");
        assert_eq!(env["AWS_SECRET_ACCESS_KEY"], "s3cr3t");
        assert_eq!(env["LOG"], "trace");
        assert_eq!(env["IN_CI"], "true");
    }

    #[tokio::test]
    async fn test_missing_source_is_fatal() {
        let spec = StackSpec {
            envs: vec!["absent".into()],
            ..StackSpec::default()
        };
        let err = build_environment(&spec, "infra", &resolver(MemorySecretStore::new()))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotFound(ref m) if m.starts_with("envs:")));

        let spec = StackSpec {
            access_token_secret: Some("no-token".into()),
            ..StackSpec::default()
        };
        let store = MemorySecretStore::new().with_secret("infra", "no-token", [("other", "x")]);
        assert!(matches!(
            build_environment(&spec, "infra", &resolver(store)).await,
            Err(Error::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_empty_spec_has_empty_environment() {
        let env = build_environment(
            &StackSpec::default(),
            "infra",
            &resolver(MemorySecretStore::new()),
        )
        .await
        .unwrap();
        assert!(env.is_empty());
    }
}
