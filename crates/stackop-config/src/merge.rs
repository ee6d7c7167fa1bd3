//! Effective stack configuration.
//!
//! Layers are applied lowest to highest precedence:
//! checked-in config, inline config, inline secrets, referenced config,
//! referenced secrets. A key set by a higher layer replaces the value and the
//! secret flag of any lower layer.

use stackop_core::stack::{ConfigValue, StackConfig};
use std::collections::BTreeMap;

/// Inputs to [`merge_config`].
#[derive(Debug, Clone, Copy)]
pub struct ConfigLayers<'a> {
    /// Configuration persisted with the project at the prepared revision.
    pub checked_in: &'a StackConfig,
    /// Inline plain values.
    pub config: &'a BTreeMap<String, String>,
    /// Inline (legacy) secret values.
    pub secrets: &'a BTreeMap<String, String>,
    /// Plain values resolved from references.
    pub resolved_config: &'a BTreeMap<String, String>,
    /// Secret values resolved from references.
    pub resolved_secrets: &'a BTreeMap<String, String>,
}

/// Merge configuration layers into the configuration handed to the engine.
pub fn merge_config(layers: ConfigLayers<'_>) -> StackConfig {
    let mut merged = layers.checked_in.clone();

    let overrides = [
        (layers.config, false),
        (layers.secrets, true),
        (layers.resolved_config, false),
        (layers.resolved_secrets, true),
    ];

    for (layer, secret) in overrides {
        for (key, value) in layer {
            merged.insert(
                key.clone(),
                ConfigValue {
                    value: value.clone(),
                    secret,
                },
            );
        }
    }

    merged
}

/// Entries of `merged` that differ from `checked_in`: the values to write.
///
/// Unchanged checked-in entries are left out. The engine reports checked-in
/// keys project-qualified (`proj:key`) while overrides may use the bare key,
/// and rewriting the old qualified entry would undo the override.
pub fn config_updates(checked_in: &StackConfig, merged: &StackConfig) -> StackConfig {
    merged
        .iter()
        .filter(|(k, v)| checked_in.get(*k) != Some(*v))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect()
}
