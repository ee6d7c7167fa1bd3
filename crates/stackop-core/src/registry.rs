//! Registry of resource kinds understood by this process.
//!
//! Built once at startup and handed to whatever decodes manifests.

use serde::de::DeserializeOwned;
use std::collections::BTreeSet;

use crate::{Error, Result};

/// A resource type identified by `apiVersion` and `kind`.
pub trait TypedResource: DeserializeOwned {
    const API_VERSION: &'static str;
    const KIND: &'static str;
}

/// Known `(apiVersion, kind)` pairs.
#[derive(Debug, Clone, Default)]
pub struct KindRegistry {
    kinds: BTreeSet<(String, String)>,
}

impl KindRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding every resource kind of this crate.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register::<crate::Stack>();
        registry
    }

    pub fn register<T: TypedResource>(&mut self) -> &mut Self {
        self.kinds
            .insert((T::API_VERSION.to_string(), T::KIND.to_string()));
        self
    }

    pub fn is_registered(&self, api_version: &str, kind: &str) -> bool {
        self.kinds
            .contains(&(api_version.to_string(), kind.to_string()))
    }

    /// Decode a manifest into `T`, rejecting unknown or mismatched kinds.
    pub fn decode<T: TypedResource>(&self, value: serde_json::Value) -> Result<T> {
        let api_version = value
            .get("apiVersion")
            .and_then(|v| v.as_str())
            .ok_or_else(|| Error::Config("manifest has no apiVersion".to_string()))?;
        let kind = value
            .get("kind")
            .and_then(|v| v.as_str())
            .ok_or_else(|| Error::Config("manifest has no kind".to_string()))?;

        if !self.is_registered(api_version, kind) {
            return Err(Error::Config(format!(
                "unregistered resource kind {api_version}/{kind}"
            )));
        }
        if api_version != T::API_VERSION || kind != T::KIND {
            return Err(Error::Config(format!(
                "expected {}/{}, got {api_version}/{kind}",
                T::API_VERSION,
                T::KIND
            )));
        }

        serde_json::from_value(value)
            .map_err(|e| Error::Config(format!("invalid {}: {e}", T::KIND)))
    }
}
