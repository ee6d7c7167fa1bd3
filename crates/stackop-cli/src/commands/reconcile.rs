//! Reconcile stacks from a manifest directory.

use anyhow::{Context, Result};
use stackop_config::{OperatorConfig, Resolver};
use stackop_core::StackKey;
use stackop_core::registry::KindRegistry;
use stackop_core::secret::SecretStore;
use stackop_core::store::StackStore;
use stackop_engine::PulumiControllerFactory;
use stackop_reconciler::{Dispatcher, FileStackStore, Reconciled, Reconciler};
use stackop_source::GitSourcePreparer;
use std::path::Path;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

pub async fn run(
    config: &OperatorConfig,
    secrets: Arc<dyn SecretStore>,
    stacks_dir: &Path,
    keys: &[String],
    max_attempts: Option<u32>,
) -> Result<()> {
    let store = Arc::new(FileStackStore::new(stacks_dir, KindRegistry::with_defaults()));
    let resolver = Resolver::new(secrets).with_default_namespace(&config.namespace);
    let reconciler = Reconciler::new(
        store.clone(),
        Arc::new(GitSourcePreparer::from_config(config)),
        Arc::new(PulumiControllerFactory::from_config(config)),
        resolver,
    )
    .with_config(config);

    let keys = if keys.is_empty() {
        store.list().await.context("Failed to list stacks")?
    } else {
        keys.iter()
            .map(|k| k.parse::<StackKey>())
            .collect::<Result<Vec<_>, _>>()?
    };
    if keys.is_empty() {
        println!("No stacks found in {}", stacks_dir.display());
        return Ok(());
    }
    info!(count = keys.len(), dir = %stacks_dir.display(), "Reconciling stacks");

    let mut dispatcher = Dispatcher::new(Arc::new(reconciler));
    if let Some(max) = max_attempts {
        dispatcher = dispatcher.with_max_attempts(max);
    }

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, cancelling in-flight attempts");
            trigger.cancel();
        }
    });

    let results = dispatcher.run_all(keys, &cancel).await;
    let mut failed = 0;
    for (key, result) in &results {
        match result {
            Ok(reconciled) => {
                if !report(key, reconciled) {
                    failed += 1;
                }
            }
            Err(e) => {
                failed += 1;
                println!("✗ {key}: {e}");
            }
        }
    }

    if failed > 0 {
        anyhow::bail!("{failed} of {} stacks did not converge", results.len());
    }
    Ok(())
}

/// Print one line per stack. Returns whether the stack converged.
fn report(key: &StackKey, reconciled: &Reconciled) -> bool {
    let commit = reconciled
        .status
        .last_update
        .as_ref()
        .and_then(|u| u.last_attempted_commit.as_deref())
        .unwrap_or("-");

    match (&reconciled.update_status, &reconciled.error) {
        (None, _) => {
            println!("• {key}: released");
            true
        }
        (Some(status), None) if status.is_success() => {
            println!("✓ {key}: {:?} at {commit}", reconciled.action);
            true
        }
        (Some(status), error) => {
            let message = error.as_ref().map(ToString::to_string).unwrap_or_default();
            println!("✗ {key}: {status:?} at {commit}: {message}");
            false
        }
    }
}
