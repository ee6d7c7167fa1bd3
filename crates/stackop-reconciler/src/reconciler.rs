//! One reconcile of one Stack: lifecycle attempt, status recording, retry decision.

use chrono::Utc;
use stackop_config::{OperatorConfig, Resolver};
use stackop_core::controller::ControllerFactory;
use stackop_core::source::SourcePreparer;
use stackop_core::stack::{Stack, StackKey, StackStatus, StackUpdateStatus};
use stackop_core::store::StackStore;
use stackop_core::{Error, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::lifecycle::{Lifecycle, LifecycleState, RunMode};
use crate::status::record;

/// What a reconcile did to the stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Updated,
    Destroyed,
    /// Deleted without `destroyOnFinalize`: released with no engine calls.
    Released,
}

/// Result of [`Reconciler::reconcile`].
#[derive(Debug, Clone, PartialEq)]
pub struct Reconciled {
    pub action: Action,
    /// Status after this reconcile, as written to the store.
    pub status: StackStatus,
    /// Classification of the attempt; `None` when no attempt ran.
    pub update_status: Option<StackUpdateStatus>,
    pub error: Option<Error>,
    /// Set when the attempt hit a conflict and `retryOnUpdateConflict` is on.
    pub requeue_after: Option<Duration>,
}

/// Drives stacks from a [`StackStore`] through the lifecycle.
pub struct Reconciler {
    store: Arc<dyn StackStore>,
    lifecycle: Lifecycle,
    retry_interval: Duration,
}

impl Reconciler {
    pub fn new(
        store: Arc<dyn StackStore>,
        source: Arc<dyn SourcePreparer>,
        controllers: Arc<dyn ControllerFactory>,
        resolver: Resolver,
    ) -> Self {
        let defaults = OperatorConfig::default();
        Self {
            store,
            lifecycle: Lifecycle::new(source, controllers, resolver)
                .with_timeout(defaults.attempt_timeout),
            retry_interval: defaults.retry_interval,
        }
    }

    /// Take retry interval and attempt timeout from operator settings.
    pub fn with_config(mut self, config: &OperatorConfig) -> Self {
        self.retry_interval = config.retry_interval;
        self.lifecycle = self.lifecycle.with_timeout(config.attempt_timeout);
        self
    }

    pub fn with_retry_interval(mut self, interval: Duration) -> Self {
        self.retry_interval = interval;
        self
    }

    pub fn with_attempt_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.lifecycle = self.lifecycle.with_timeout(timeout);
        self
    }

    pub fn store(&self) -> &Arc<dyn StackStore> {
        &self.store
    }

    /// Load a stack from the store and reconcile it.
    pub async fn reconcile_key(
        &self,
        key: &StackKey,
        cancel: &CancellationToken,
    ) -> Result<Reconciled> {
        let stack = self.store.get(key).await?;
        self.reconcile(&stack, cancel).await
    }

    /// Run one attempt for `stack` and persist the resulting status.
    ///
    /// Returns `Err(Cancelled)` without writing status when `cancel` fires.
    pub async fn reconcile(&self, stack: &Stack, cancel: &CancellationToken) -> Result<Reconciled> {
        let key = stack.key();

        let mode = if stack.is_being_deleted() {
            if !stack.spec.destroy_on_finalize {
                info!(stack = %key, "Stack deleted without destroyOnFinalize, releasing");
                return Ok(Reconciled {
                    action: Action::Released,
                    status: stack.status.clone().unwrap_or_default(),
                    update_status: None,
                    error: None,
                    requeue_after: None,
                });
            }
            RunMode::Destroy
        } else {
            RunMode::Update
        };

        let outcome = self.lifecycle.run(stack, mode, cancel).await?;
        let status = record(stack.status.as_ref(), &outcome, Utc::now());
        self.store.update_status(&key, &status).await?;

        let requeue_after = (outcome.status.is_retryable() && stack.spec.retry_on_update_conflict)
            .then_some(self.retry_interval);
        if let Some(delay) = requeue_after {
            info!(stack = %key, delay_secs = delay.as_secs(), "Update conflict, requeueing");
        }

        let action = match outcome.state {
            LifecycleState::Destroyed => Action::Destroyed,
            _ if mode == RunMode::Destroy => Action::Destroyed,
            _ => Action::Updated,
        };

        Ok(Reconciled {
            action,
            status,
            update_status: Some(outcome.status),
            error: outcome.error,
            requeue_after,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fake::{FakeEngine, FakeSourcePreparer};
    use crate::store::MemoryStackStore;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
    use serde_json::json;
    use stackop_core::secret::MemorySecretStore;
    use stackop_core::stack::{StackOutputs, StackSpec, UpdateState};
    use std::collections::BTreeMap;

    fn spec() -> StackSpec {
        StackSpec {
            stack: "acme/app-dev".into(),
            project_repo: "https://github.com/acme/app".into(),
            ..StackSpec::default()
        }
    }

    async fn setup(
        stack: Stack,
        engine: &FakeEngine,
        source: &FakeSourcePreparer,
    ) -> (Reconciler, Arc<MemoryStackStore>) {
        let store = Arc::new(MemoryStackStore::new());
        store.insert(stack).await;
        let resolver =
            Resolver::new(Arc::new(MemorySecretStore::new())).with_env(BTreeMap::new());
        let reconciler = Reconciler::new(
            store.clone(),
            Arc::new(source.clone()),
            Arc::new(engine.clone()),
            resolver,
        )
        .with_retry_interval(Duration::from_millis(5));
        (reconciler, store)
    }

    fn deleted(mut stack: Stack) -> Stack {
        stack.metadata.deletion_timestamp = Some(Time(Utc::now()));
        stack
    }

    #[tokio::test]
    async fn test_update_records_status() {
        let engine = FakeEngine::new()
            .with_outputs(StackOutputs::from([("bucket".to_string(), json!("b-1"))]));
        let source = FakeSourcePreparer::new("c1");
        let stack = Stack::new("app", "infra", spec());
        let (reconciler, store) = setup(stack.clone(), &engine, &source).await;

        let result = reconciler
            .reconcile(&stack, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(result.action, Action::Updated);
        assert_eq!(result.update_status, Some(StackUpdateStatus::Succeeded));
        assert_eq!(result.requeue_after, None);

        let stored = store.get(&stack.key()).await.unwrap().status.unwrap();
        assert_eq!(stored, result.status);
        assert_eq!(stored.last_successful_commit(), Some("c1"));
        assert_eq!(stored.outputs.unwrap()["bucket"], json!("b-1"));
    }

    #[tokio::test]
    async fn test_conflict_requeues_only_when_enabled() {
        for retry in [false, true] {
            let engine = FakeEngine::new();
            engine.push_update(Err(Error::EngineConflict("409".into())));
            let source = FakeSourcePreparer::new("c1");
            let stack = Stack::new(
                "app",
                "infra",
                StackSpec {
                    retry_on_update_conflict: retry,
                    ..spec()
                },
            );
            let (reconciler, _) = setup(stack.clone(), &engine, &source).await;

            let result = reconciler
                .reconcile(&stack, &CancellationToken::new())
                .await
                .unwrap();

            assert_eq!(result.update_status, Some(StackUpdateStatus::Conflict));
            assert_eq!(
                result.status.last_update.unwrap().state,
                UpdateState::Failed
            );
            assert_eq!(
                result.requeue_after,
                retry.then_some(Duration::from_millis(5))
            );
            assert_eq!(engine.count("update"), 1);
        }
    }

    #[tokio::test]
    async fn test_deleted_without_destroy_is_released() {
        let engine = FakeEngine::new();
        let source = FakeSourcePreparer::new("c1");
        let stack = deleted(Stack::new("app", "infra", spec()));
        let (reconciler, _) = setup(stack.clone(), &engine, &source).await;

        let result = reconciler
            .reconcile(&stack, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(result.action, Action::Released);
        assert_eq!(result.update_status, None);
        assert!(engine.calls().is_empty());
        assert!(source.requests().is_empty());
    }

    #[tokio::test]
    async fn test_deleted_with_destroy_runs_destroy() {
        let engine = FakeEngine::new();
        let source = FakeSourcePreparer::new("c2");
        let mut stack = deleted(Stack::new(
            "app",
            "infra",
            StackSpec {
                destroy_on_finalize: true,
                ..spec()
            },
        ));
        stack.status = Some(StackStatus {
            outputs: Some(StackOutputs::from([("bucket".to_string(), json!("b-1"))])),
            last_update: None,
        });
        let (reconciler, _) = setup(stack.clone(), &engine, &source).await;

        let result = reconciler
            .reconcile(&stack, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(result.action, Action::Destroyed);
        assert_eq!(result.update_status, Some(StackUpdateStatus::Succeeded));
        assert_eq!(result.status.outputs, None);
        assert_eq!(engine.count("destroy"), 1);
        assert_eq!(engine.count("update"), 0);
    }

    #[tokio::test]
    async fn test_destroy_conflict_requeues_when_enabled() {
        let engine = FakeEngine::new();
        engine.push_destroy(Err(Error::EngineConflict("409".into())));
        let source = FakeSourcePreparer::new("c2");
        let stack = deleted(Stack::new(
            "app",
            "infra",
            StackSpec {
                destroy_on_finalize: true,
                retry_on_update_conflict: true,
                ..spec()
            },
        ));
        let (reconciler, _) = setup(stack.clone(), &engine, &source).await;

        let result = reconciler
            .reconcile(&stack, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(result.action, Action::Destroyed);
        assert_eq!(result.update_status, Some(StackUpdateStatus::Conflict));
        assert_eq!(result.requeue_after, Some(Duration::from_millis(5)));
        assert_eq!(
            result.status.last_update.unwrap().state,
            UpdateState::Failed
        );
        assert_eq!(engine.count("destroy"), 1);
        assert_eq!(engine.count("update"), 0);
    }

    #[tokio::test]
    async fn test_cancel_leaves_status_untouched() {
        let engine = FakeEngine::new();
        let source = FakeSourcePreparer::new("c1");
        let stack = Stack::new("app", "infra", spec());
        let (reconciler, store) = setup(stack.clone(), &engine, &source).await;

        let token = CancellationToken::new();
        token.cancel();
        assert_eq!(
            reconciler.reconcile(&stack, &token).await,
            Err(Error::Cancelled)
        );
        assert!(store.get(&stack.key()).await.unwrap().status.is_none());
    }

    #[tokio::test]
    async fn test_attempt_timeout_is_a_failure() {
        let gate = Arc::new(tokio::sync::Notify::new());
        let engine = FakeEngine::new().with_gate(gate);
        let source = FakeSourcePreparer::new("c1");
        let stack = Stack::new("app", "infra", spec());
        let (reconciler, _) = setup(stack.clone(), &engine, &source).await;
        let reconciler = reconciler.with_attempt_timeout(Some(Duration::from_millis(20)));

        let result = reconciler
            .reconcile(&stack, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(result.update_status, Some(StackUpdateStatus::Failed));
        assert!(matches!(result.error, Some(Error::EngineFailed(_))));
        assert_eq!(source.released(), 1);

        // The branch checkout's commit is still recorded.
        let update = result.status.last_update.unwrap();
        assert_eq!(update.last_attempted_commit.as_deref(), Some("c1"));
    }

    #[tokio::test]
    async fn test_failure_keeps_last_successful_commit() {
        let engine = FakeEngine::new();
        let source = FakeSourcePreparer::new("c1");
        let stack = Stack::new("app", "infra", spec());
        let (reconciler, store) = setup(stack.clone(), &engine, &source).await;
        let token = CancellationToken::new();

        reconciler.reconcile_key(&stack.key(), &token).await.unwrap();

        engine.push_update(Err(Error::EngineFailed("boom".into())));
        let pinned = Stack {
            spec: StackSpec {
                commit: Some("c2".into()),
                ..spec()
            },
            status: store.get(&stack.key()).await.unwrap().status,
            ..stack.clone()
        };
        let result = reconciler.reconcile(&pinned, &token).await.unwrap();

        let update = result.status.last_update.unwrap();
        assert_eq!(update.state, UpdateState::Failed);
        assert_eq!(update.last_attempted_commit.as_deref(), Some("c2"));
        assert_eq!(update.last_successful_commit.as_deref(), Some("c1"));
    }
}
