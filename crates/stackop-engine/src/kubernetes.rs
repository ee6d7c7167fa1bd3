//! Secret store backed by Kubernetes `Secret` and `ConfigMap` objects.

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{ConfigMap, Secret};
use kube::{Api, Client};
use stackop_core::secret::SecretStore;
use stackop_core::{Error, Result};
use std::collections::BTreeMap;
use tracing::debug;

/// Reads secrets and config maps through the Kubernetes API.
pub struct KubeSecretStore {
    client: Client,
}

impl KubeSecretStore {
    /// Connect with the in-cluster or kubeconfig credentials.
    pub async fn try_default() -> Result<Self> {
        let client = Client::try_default()
            .await
            .map_err(|e| Error::Internal(format!("kubernetes client: {e}")))?;
        Ok(Self { client })
    }

    pub fn with_client(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl SecretStore for KubeSecretStore {
    fn name(&self) -> &'static str {
        "kubernetes"
    }

    async fn get_secret(&self, namespace: &str, name: &str) -> Result<BTreeMap<String, String>> {
        debug!(namespace, name, "Reading secret");
        let api: Api<Secret> = Api::namespaced(self.client.clone(), namespace);
        let secret = api
            .get(name)
            .await
            .map_err(|e| map_kube_error("secret", namespace, name, e))?;
        secret_data(namespace, name, secret)
    }

    async fn get_config_map(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<BTreeMap<String, String>> {
        debug!(namespace, name, "Reading config map");
        let api: Api<ConfigMap> = Api::namespaced(self.client.clone(), namespace);
        let config_map = api
            .get(name)
            .await
            .map_err(|e| map_kube_error("config map", namespace, name, e))?;
        Ok(config_map.data.unwrap_or_default())
    }
}

/// Decoded string values of a secret. `stringData` wins over `data`.
fn secret_data(namespace: &str, name: &str, secret: Secret) -> Result<BTreeMap<String, String>> {
    let mut values = BTreeMap::new();

    for (key, bytes) in secret.data.unwrap_or_default() {
        let value = String::from_utf8(bytes.0).map_err(|_| {
            Error::Config(format!(
                "key {key:?} of secret {namespace}/{name} is not valid UTF-8"
            ))
        })?;
        values.insert(key, value);
    }
    values.extend(secret.string_data.unwrap_or_default());

    Ok(values)
}

fn map_kube_error(what: &str, namespace: &str, name: &str, err: kube::Error) -> Error {
    match err {
        kube::Error::Api(resp) if resp.code == 404 => {
            Error::NotFound(format!("{what} {namespace}/{name}"))
        }
        kube::Error::Api(resp) if resp.code == 403 => {
            Error::AccessDenied(format!("{what} {namespace}/{name}: {}", resp.message))
        }
        other => Error::Internal(format!("reading {what} {namespace}/{name}: {other}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::ByteString;
    use kube::error::ErrorResponse;

    fn api_error(code: u16) -> kube::Error {
        kube::Error::Api(ErrorResponse {
            status: "Failure".into(),
            message: format!("request failed with {code}"),
            reason: "Test".into(),
            code,
        })
    }

    #[test]
    fn test_map_kube_error() {
        assert!(matches!(
            map_kube_error("secret", "ops", "creds", api_error(404)),
            Error::NotFound(_)
        ));
        assert!(matches!(
            map_kube_error("secret", "ops", "creds", api_error(403)),
            Error::AccessDenied(_)
        ));
        assert!(matches!(
            map_kube_error("secret", "ops", "creds", api_error(500)),
            Error::Internal(_)
        ));
    }

    #[test]
    fn test_secret_data_decodes_bytes() {
        let secret = Secret {
            data: Some(BTreeMap::from([
                ("token".to_string(), ByteString(b"t0k3n".to_vec())),
                ("user".to_string(), ByteString(b"bot".to_vec())),
            ])),
            string_data: Some(BTreeMap::from([("user".to_string(), "admin".to_string())])),
            ..Secret::default()
        };

        let values = secret_data("ops", "creds", secret).unwrap();
        assert_eq!(values["token"], "t0k3n");
        assert_eq!(values["user"], "admin");
    }

    #[test]
    fn test_secret_data_rejects_binary() {
        let secret = Secret {
            data: Some(BTreeMap::from([(
                "cert".to_string(),
                ByteString(vec![0xff, 0xfe]),
            )])),
            ..Secret::default()
        };
        assert!(matches!(
            secret_data("ops", "tls", secret),
            Err(Error::Config(_))
        ));
    }
}
