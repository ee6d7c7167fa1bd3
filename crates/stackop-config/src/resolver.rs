//! Resolution of resource references to concrete values.
//!
//! Resolution only reads from the indicated backend. A `Resolver` holds no
//! mutable state, so disjoint references can be resolved concurrently.

use futures::future::try_join_all;
use stackop_core::resource::{DEFAULT_SECRET_NAMESPACE, ResourceRef};
use stackop_core::secret::SecretStore;
use stackop_core::{Error, Result};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;

/// Where environment references are looked up.
#[derive(Debug, Clone)]
enum EnvSource {
    /// The operator process environment.
    Process,
    /// A fixed snapshot.
    Fixed(BTreeMap<String, String>),
}

/// Resolves [`ResourceRef`]s against the process environment, the filesystem
/// and a secret store.
#[derive(Clone)]
pub struct Resolver {
    secrets: Arc<dyn SecretStore>,
    default_namespace: String,
    env: EnvSource,
}

impl Resolver {
    pub fn new(secrets: Arc<dyn SecretStore>) -> Self {
        Self {
            secrets,
            default_namespace: DEFAULT_SECRET_NAMESPACE.to_string(),
            env: EnvSource::Process,
        }
    }

    /// Namespace used for secret selectors that omit one.
    pub fn with_default_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.default_namespace = namespace.into();
        self
    }

    /// Look environment references up in `env` instead of the process environment.
    pub fn with_env(mut self, env: BTreeMap<String, String>) -> Self {
        self.env = EnvSource::Fixed(env);
        self
    }

    pub fn secrets(&self) -> &Arc<dyn SecretStore> {
        &self.secrets
    }

    /// Resolve a single reference.
    pub async fn resolve(&self, reference: &ResourceRef) -> Result<String> {
        debug!(reference = %reference, "Resolving resource reference");

        match reference {
            ResourceRef::Literal { literal } => Ok(literal.value.clone()),
            ResourceRef::Env { env } => self.lookup_env(&env.name),
            ResourceRef::FileSystem { filesystem } => {
                tokio::fs::read_to_string(&filesystem.path)
                    .await
                    .map_err(|e| Error::Io(format!("reading {}: {}", filesystem.path, e)))
            }
            ResourceRef::Secret { secret } => {
                let namespace = secret.namespace_or(&self.default_namespace);
                self.secrets
                    .get_key(namespace, &secret.name, &secret.key)
                    .await
            }
        }
    }

    /// Resolve every reference of a map concurrently. Fails on the first error.
    pub async fn resolve_map(
        &self,
        references: &BTreeMap<String, ResourceRef>,
    ) -> Result<BTreeMap<String, String>> {
        let lookups = references.iter().map(|(name, reference)| async move {
            let value = self.resolve(reference).await.map_err(|e| annotate(name, e))?;
            Ok::<_, Error>((name.clone(), value))
        });

        Ok(try_join_all(lookups).await?.into_iter().collect())
    }

    fn lookup_env(&self, name: &str) -> Result<String> {
        let value = match &self.env {
            EnvSource::Process => std::env::var(name).ok(),
            EnvSource::Fixed(env) => env.get(name).cloned(),
        };
        value.ok_or_else(|| Error::NotFound(format!("environment variable {name}")))
    }
}

/// Prefix the error message with the map entry that failed, keeping its kind.
fn annotate(name: &str, err: Error) -> Error {
    match err {
        Error::NotFound(m) => Error::NotFound(format!("{name}: {m}")),
        Error::AccessDenied(m) => Error::AccessDenied(format!("{name}: {m}")),
        Error::Io(m) => Error::Io(format!("{name}: {m}")),
        Error::Config(m) => Error::Config(format!("{name}: {m}")),
        other => other,
    }
}
