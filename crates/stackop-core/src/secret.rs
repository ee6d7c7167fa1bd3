//! Secret and config map storage abstraction.

use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::RwLock;

use crate::{Error, Result};

/// Trait for namespaced secret/config backends.
#[async_trait]
pub trait SecretStore: Send + Sync {
    /// Name of this backend.
    fn name(&self) -> &'static str;

    /// Get every key of a secret.
    async fn get_secret(&self, namespace: &str, name: &str) -> Result<BTreeMap<String, String>>;

    /// Get every key of a config map.
    async fn get_config_map(&self, namespace: &str, name: &str)
    -> Result<BTreeMap<String, String>>;

    /// Get a single key from a secret.
    async fn get_key(&self, namespace: &str, name: &str, key: &str) -> Result<String> {
        let mut data = self.get_secret(namespace, name).await?;
        data.remove(key).ok_or_else(|| {
            Error::NotFound(format!("key {key:?} in secret {namespace}/{name}"))
        })
    }
}

/// In-memory backend, used by tests and by the CLI's `--secrets-file`.
#[derive(Debug, Default)]
pub struct MemorySecretStore {
    secrets: RwLock<HashMap<(String, String), BTreeMap<String, String>>>,
    config_maps: RwLock<HashMap<(String, String), BTreeMap<String, String>>>,
    denied: RwLock<Vec<(String, String)>>,
}

impl MemorySecretStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_secret<I, K, V>(self, namespace: &str, name: &str, data: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.insert_secret(namespace, name, data);
        self
    }

    pub fn with_config_map<I, K, V>(self, namespace: &str, name: &str, data: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let data = data.into_iter().map(|(k, v)| (k.into(), v.into())).collect();
        if let Ok(mut maps) = self.config_maps.write() {
            maps.insert((namespace.to_string(), name.to_string()), data);
        }
        self
    }

    /// Make reads of a secret fail as if the caller lacked permission.
    pub fn with_denied(self, namespace: &str, name: &str) -> Self {
        if let Ok(mut denied) = self.denied.write() {
            denied.push((namespace.to_string(), name.to_string()));
        }
        self
    }

    pub fn insert_secret<I, K, V>(&self, namespace: &str, name: &str, data: I)
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let data = data.into_iter().map(|(k, v)| (k.into(), v.into())).collect();
        if let Ok(mut secrets) = self.secrets.write() {
            secrets.insert((namespace.to_string(), name.to_string()), data);
        }
    }

    fn check_access(&self, namespace: &str, name: &str) -> Result<()> {
        let denied = self
            .denied
            .read()
            .map_err(|e| Error::Internal(e.to_string()))?;
        if denied.iter().any(|(ns, n)| ns == namespace && n == name) {
            return Err(Error::AccessDenied(format!("secret {namespace}/{name}")));
        }
        Ok(())
    }
}

#[async_trait]
impl SecretStore for MemorySecretStore {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn get_secret(&self, namespace: &str, name: &str) -> Result<BTreeMap<String, String>> {
        self.check_access(namespace, name)?;
        let secrets = self
            .secrets
            .read()
            .map_err(|e| Error::Internal(e.to_string()))?;
        secrets
            .get(&(namespace.to_string(), name.to_string()))
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("secret {namespace}/{name}")))
    }

    async fn get_config_map(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<BTreeMap<String, String>> {
        let maps = self
            .config_maps
            .read()
            .map_err(|e| Error::Internal(e.to_string()))?;
        maps.get(&(namespace.to_string(), name.to_string()))
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("config map {namespace}/{name}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_get_key() {
        let store = MemorySecretStore::new().with_secret("ops", "creds", [("token", "t0k3n")]);

        assert_eq!(store.get_key("ops", "creds", "token").await.unwrap(), "t0k3n");
        assert!(matches!(
            store.get_key("ops", "creds", "missing").await,
            Err(Error::NotFound(_))
        ));
        assert!(matches!(
            store.get_key("default", "creds", "token").await,
            Err(Error::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_denied_secret() {
        let store = MemorySecretStore::new()
            .with_secret("ops", "creds", [("token", "t0k3n")])
            .with_denied("ops", "creds");

        assert!(matches!(
            store.get_key("ops", "creds", "token").await,
            Err(Error::AccessDenied(_))
        ));
    }
}
