//! Manifest validation.

use anyhow::Result;
use stackop_core::registry::KindRegistry;
use stackop_core::{Error, Stack};
use std::path::{Path, PathBuf};

/// Validate each manifest and report every failure before returning.
pub async fn run(paths: &[PathBuf]) -> Result<()> {
    let registry = KindRegistry::with_defaults();
    let mut invalid = 0;

    for path in paths {
        let result = match tokio::fs::read_to_string(path).await {
            Ok(text) => validate_manifest(&registry, &text, is_yaml(path)),
            Err(e) => Err(e.into()),
        };
        match result {
            Ok(stack) => println!(
                "✓ {} ({}, stack {})",
                path.display(),
                stack.key(),
                stack.spec.stack
            ),
            Err(e) => {
                invalid += 1;
                println!("✗ {}: {}", path.display(), e);
            }
        }
    }

    if invalid > 0 {
        anyhow::bail!("{invalid} of {} manifests are invalid", paths.len());
    }
    Ok(())
}

fn is_yaml(path: &Path) -> bool {
    matches!(
        path.extension().and_then(|e| e.to_str()),
        Some("yaml") | Some("yml")
    )
}

/// Decode a Stack manifest and check its spec. No backend is contacted.
pub fn validate_manifest(registry: &KindRegistry, text: &str, yaml: bool) -> Result<Stack, Error> {
    let value: serde_json::Value = if yaml {
        serde_yaml::from_str(text).map_err(|e| Error::Config(format!("invalid YAML: {e}")))?
    } else {
        serde_json::from_str(text).map_err(|e| Error::Config(format!("invalid JSON: {e}")))?
    };

    let stack: Stack = registry.decode(value)?;
    stack.spec.validate()?;
    Ok(stack)
}
