//! CLI command implementations.

pub mod reconcile;
pub mod resolve;
pub mod validate;

use anyhow::{Context, Result};
use serde::Deserialize;
use stackop_config::OperatorConfig;
use stackop_core::secret::{MemorySecretStore, SecretStore};
use stackop_engine::KubeSecretStore;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use tracing::info;

/// Operator settings from `path`, or from the environment when none is given.
pub async fn load_config(path: Option<&Path>) -> Result<OperatorConfig> {
    match path {
        Some(path) => OperatorConfig::load(path)
            .await
            .with_context(|| format!("Failed to load config file: {}", path.display())),
        None => OperatorConfig::from_env().context("Invalid operator settings in environment"),
    }
}

/// Contents of a `--secrets-file`, keyed by `namespace/name`.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SecretsFile {
    #[serde(default)]
    pub secrets: BTreeMap<String, BTreeMap<String, String>>,
    #[serde(default)]
    pub config_maps: BTreeMap<String, BTreeMap<String, String>>,
}

impl SecretsFile {
    pub fn into_store(self) -> Result<MemorySecretStore> {
        let mut store = MemorySecretStore::new();
        for (id, data) in self.secrets {
            let (namespace, name) = split_id(&id)?;
            store = store.with_secret(namespace, name, data);
        }
        for (id, data) in self.config_maps {
            let (namespace, name) = split_id(&id)?;
            store = store.with_config_map(namespace, name, data);
        }
        Ok(store)
    }
}

fn split_id(id: &str) -> Result<(&str, &str)> {
    match id.split_once('/') {
        Some((ns, name)) if !ns.is_empty() && !name.is_empty() => Ok((ns, name)),
        _ => anyhow::bail!("expected namespace/name, got {id:?}"),
    }
}

/// Secret backend: the secrets file when given, otherwise the current cluster.
pub async fn secret_store(secrets_file: Option<&Path>) -> Result<Arc<dyn SecretStore>> {
    if let Some(path) = secrets_file {
        let text = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read secrets file: {}", path.display()))?;
        let file: SecretsFile = serde_json::from_str(&text)
            .with_context(|| format!("Failed to parse secrets file: {}", path.display()))?;
        info!(path = %path.display(), "Using secrets file");
        return Ok(Arc::new(file.into_store()?));
    }

    let store = KubeSecretStore::try_default()
        .await
        .context("Failed to connect to Kubernetes for secrets")?;
    Ok(Arc::new(store))
}
