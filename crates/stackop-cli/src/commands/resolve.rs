//! Resource reference resolution.

use anyhow::{Context, Result};
use stackop_config::{OperatorConfig, Resolver};
use stackop_core::ResourceRef;
use stackop_core::secret::SecretStore;
use std::sync::Arc;

pub async fn run(
    config: &OperatorConfig,
    secrets: Arc<dyn SecretStore>,
    reference: &str,
) -> Result<()> {
    let reference = parse_reference(reference)?;
    let resolver = Resolver::new(secrets).with_default_namespace(&config.namespace);

    let value = resolver
        .resolve(&reference)
        .await
        .with_context(|| format!("Failed to resolve {reference}"))?;
    println!("{value}");
    Ok(())
}

fn parse_reference(text: &str) -> Result<ResourceRef> {
    let reference: ResourceRef =
        serde_json::from_str(text).context("Reference must be a JSON resource reference")?;
    reference.validate()?;
    Ok(reference)
}

#[cfg(test)]
mod tests {
    use super::*;
    use stackop_core::secret::MemorySecretStore;
    use std::collections::BTreeMap;

    #[test]
    fn test_parse_reference() {
        let reference = parse_reference(r#"{"type":"Env","env":{"name":"HOME"}}"#).unwrap();
        assert_eq!(reference, ResourceRef::env("HOME"));

        assert!(parse_reference(r#"{"type":"Env","env":{"name":" "}}"#).is_err());
        assert!(parse_reference(r#"{"type":"Vault"}"#).is_err());
    }

    #[tokio::test]
    async fn test_secret_uses_configured_namespace() {
        let secrets = Arc::new(MemorySecretStore::new().with_secret(
            "infra",
            "creds",
            [("token", "s3cr3t")],
        ));
        let resolver = Resolver::new(secrets)
            .with_default_namespace("infra")
            .with_env(BTreeMap::new());
        let reference =
            parse_reference(r#"{"type":"Secret","secret":{"name":"creds","key":"token"}}"#)
                .unwrap();

        assert_eq!(resolver.resolve(&reference).await.unwrap(), "s3cr3t");
    }
}
