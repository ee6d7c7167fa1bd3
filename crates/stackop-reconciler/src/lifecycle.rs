//! The lifecycle of one reconcile attempt.
//!
//! ```text
//! Initializing -> DependenciesInstalled -> ConfigApplied -> [Refreshed]
//!     -> Converged(succeeded | failed | conflict | pendingOperations | notFound)
//!     -> Destroyed (instead of an update, when the stack is being finalized)
//! ```
//!
//! Every failure before the update or destroy step ends the attempt as
//! `failed`. Errors of the update or destroy step itself are classified.

use stackop_config::{ConfigLayers, Resolver, merge::config_updates, merge_config};
use stackop_core::controller::{ControllerFactory, RunSummary, StackController};
use stackop_core::source::{Checkout, SourcePreparer, SourceRequest};
use stackop_core::stack::{Permalink, Stack, StackOutputs, StackUpdateStatus};
use stackop_core::{AttemptId, Error, Result};
use stackop_source::resolve_credentials;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::cancel::OrCancelExt;
use crate::environment::build_environment;

/// What an attempt converges the stack towards.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    Update,
    Destroy,
}

/// Position of an attempt in the lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Initializing,
    DependenciesInstalled,
    ConfigApplied,
    Refreshed,
    Converged(StackUpdateStatus),
    Destroyed,
}

impl std::fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LifecycleState::Initializing => write!(f, "initializing"),
            LifecycleState::DependenciesInstalled => write!(f, "dependenciesInstalled"),
            LifecycleState::ConfigApplied => write!(f, "configApplied"),
            LifecycleState::Refreshed => write!(f, "refreshed"),
            LifecycleState::Converged(status) => write!(f, "converged({status})"),
            LifecycleState::Destroyed => write!(f, "destroyed"),
        }
    }
}

/// How an attempt changes the recorded outputs.
#[derive(Debug, Clone, PartialEq)]
pub enum OutputsChange {
    Keep,
    Replace(StackOutputs),
    Clear,
}

/// Terminal result of one attempt, consumed by the status recorder.
#[derive(Debug, Clone, PartialEq)]
pub struct AttemptOutcome {
    pub attempt: AttemptId,
    pub state: LifecycleState,
    pub status: StackUpdateStatus,
    /// Commit the attempt worked on: the checkout's, or the pinned commit
    /// when no checkout was made.
    pub commit: Option<String>,
    pub permalink: Option<Permalink>,
    pub outputs: OutputsChange,
    pub error: Option<Error>,
}

impl AttemptOutcome {
    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }
}

/// Mutable context of a running attempt.
struct Attempt {
    id: AttemptId,
    state: LifecycleState,
    commit: Option<String>,
    permalink: Option<Permalink>,
    checkout: Option<Checkout>,
}

impl Attempt {
    fn advance(&mut self, to: LifecycleState, stack: &str) {
        info!(attempt = %self.id, stack, from = %self.state, to = %to, "Lifecycle transition");
        self.state = to;
    }

    fn keep_permalink(&mut self, summary: &RunSummary) {
        if let Some(link) = &summary.permalink {
            self.permalink = Some(link.clone());
        }
    }

    fn finish(
        &mut self,
        status: StackUpdateStatus,
        outputs: OutputsChange,
        error: Option<Error>,
    ) -> AttemptOutcome {
        AttemptOutcome {
            attempt: self.id,
            state: self.state,
            status,
            commit: self.commit.clone(),
            permalink: self.permalink.clone(),
            outputs,
            error,
        }
    }
}

/// Runs attempts against a source preparer and a controller factory.
pub struct Lifecycle {
    source: Arc<dyn SourcePreparer>,
    controllers: Arc<dyn ControllerFactory>,
    resolver: Resolver,
    timeout: Option<Duration>,
}

impl Lifecycle {
    pub fn new(
        source: Arc<dyn SourcePreparer>,
        controllers: Arc<dyn ControllerFactory>,
        resolver: Resolver,
    ) -> Self {
        Self {
            source,
            controllers,
            resolver,
            timeout: None,
        }
    }

    /// Bound every attempt. An attempt that runs over is cancelled and
    /// recorded as failed.
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Run one attempt to a terminal state.
    ///
    /// Returns `Err` only when `cancel` fires; every other failure is part of
    /// the outcome.
    pub async fn run(
        &self,
        stack: &Stack,
        mode: RunMode,
        cancel: &CancellationToken,
    ) -> Result<AttemptOutcome> {
        let key = stack.key();
        let mut attempt = Attempt {
            id: AttemptId::new(),
            state: LifecycleState::Initializing,
            commit: stack.spec.commit.clone().filter(|c| !c.is_empty()),
            permalink: None,
            checkout: None,
        };
        info!(attempt = %attempt.id, stack = %key, ?mode, "Starting attempt");

        // A child token stops the attempt on timeout without cancelling the caller.
        let token = cancel.child_token();
        let drive = self.drive(stack, mode, &self.resolver, &token, &mut attempt);
        let result = match self.timeout {
            None => drive.await,
            Some(limit) => {
                tokio::pin!(drive);
                tokio::select! {
                    result = &mut drive => result,
                    _ = tokio::time::sleep(limit) => {
                        token.cancel();
                        match drive.await {
                            Err(Error::Cancelled) if !cancel.is_cancelled() => {
                                warn!(
                                    stack = %key,
                                    limit_secs = limit.as_secs(),
                                    "Attempt timed out"
                                );
                                Err(Error::EngineFailed(format!(
                                    "attempt timed out after {}s",
                                    limit.as_secs()
                                )))
                            }
                            other => other,
                        }
                    }
                }
            }
        };

        if let Some(checkout) = attempt.checkout.take() {
            if let Err(e) = self.source.release(&checkout).await {
                warn!(attempt = %attempt.id, error = %e, "Failed to release checkout");
            }
        }

        let outcome = match result {
            Ok(outcome) => outcome,
            Err(Error::Cancelled) => {
                info!(attempt = %attempt.id, state = %attempt.state, "Attempt cancelled");
                return Err(Error::Cancelled);
            }
            Err(e) => {
                warn!(
                    attempt = %attempt.id,
                    state = %attempt.state,
                    kind = e.kind(),
                    error = %e,
                    "Attempt failed"
                );
                attempt.state = LifecycleState::Converged(StackUpdateStatus::Failed);
                attempt.finish(StackUpdateStatus::Failed, OutputsChange::Keep, Some(e))
            }
        };

        info!(
            attempt = %outcome.attempt,
            stack = %key,
            status = %outcome.status,
            commit = outcome.commit.as_deref().unwrap_or(""),
            "Attempt finished"
        );
        Ok(outcome)
    }

    async fn drive(
        &self,
        stack: &Stack,
        mode: RunMode,
        resolver: &Resolver,
        cancel: &CancellationToken,
        attempt: &mut Attempt,
    ) -> Result<AttemptOutcome> {
        let spec = &stack.spec;
        let key = stack.key();
        let name = spec.stack.as_str();

        // Nothing is prepared for a spec that is invalid on its face.
        spec.validate()?;
        let revision = spec.revision()?;

        let envs = build_environment(spec, &key.namespace, resolver)
            .or_cancel(cancel)
            .await?;
        let credentials = resolve_credentials(spec, resolver, &key.namespace)
            .or_cancel(cancel)
            .await?;

        let request = SourceRequest {
            repo_url: spec.project_repo.clone(),
            revision,
            repo_dir: spec.repo_dir.clone(),
            credentials,
        };
        let checkout = self.source.prepare(&request).or_cancel(cancel).await?;
        attempt.commit = Some(checkout.commit.clone());
        attempt.checkout = Some(checkout.clone());

        let mut controller = self
            .controllers
            .open(&checkout, spec)
            .or_cancel(cancel)
            .await?;
        debug!(controller = controller.name(), "Opened stack controller");

        controller.set_envs(&envs).or_cancel(cancel).await?;
        controller
            .install_project_dependencies()
            .or_cancel(cancel)
            .await?;
        attempt.advance(LifecycleState::DependenciesInstalled, name);

        self.apply_config(controller.as_mut(), stack, resolver, cancel)
            .await?;
        attempt.advance(LifecycleState::ConfigApplied, name);

        if spec.refresh {
            let summary = controller
                .refresh_stack(spec.expect_no_refresh_changes)
                .or_cancel(cancel)
                .await?;
            attempt.keep_permalink(&summary);
            attempt.advance(LifecycleState::Refreshed, name);
        }

        match mode {
            RunMode::Update => Self::converge_update(controller.as_mut(), cancel, attempt).await,
            RunMode::Destroy => Self::converge_destroy(controller.as_mut(), cancel, attempt).await,
        }
    }

    async fn apply_config(
        &self,
        controller: &mut dyn StackController,
        stack: &Stack,
        resolver: &Resolver,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let spec = &stack.spec;

        controller
            .select_stack(&spec.stack, spec.secrets_provider.as_deref())
            .or_cancel(cancel)
            .await?;

        let checked_in = controller.get_config().or_cancel(cancel).await?;
        let resolved_config = resolver
            .resolve_map(&spec.config_refs)
            .or_cancel(cancel)
            .await?;
        let resolved_secrets = resolver
            .resolve_map(&spec.secret_refs)
            .or_cancel(cancel)
            .await?;

        let merged = merge_config(ConfigLayers {
            checked_in: &checked_in,
            config: &spec.config,
            secrets: &spec.secrets,
            resolved_config: &resolved_config,
            resolved_secrets: &resolved_secrets,
        });

        let updates = config_updates(&checked_in, &merged);
        if updates.is_empty() {
            debug!("Stack configuration already up to date");
            return Ok(());
        }
        debug!(keys = ?updates.keys().collect::<Vec<_>>(), "Applying stack configuration");
        controller.update_config(&updates).or_cancel(cancel).await
    }

    async fn converge_update(
        controller: &mut dyn StackController,
        cancel: &CancellationToken,
        attempt: &mut Attempt,
    ) -> Result<AttemptOutcome> {
        let summary = match controller.update_stack().or_cancel(cancel).await {
            Ok(summary) => summary,
            Err(Error::Cancelled) => return Err(Error::Cancelled),
            Err(e) => return Ok(Self::classified(attempt, e)),
        };
        attempt.keep_permalink(&summary);

        // The update is deployed at this point; unreadable outputs do not undo that.
        let outputs = match controller.get_stack_outputs().or_cancel(cancel).await {
            Ok(outputs) => OutputsChange::Replace(outputs),
            Err(Error::Cancelled) => return Err(Error::Cancelled),
            Err(e) => {
                warn!(
                    attempt = %attempt.id,
                    error = %e,
                    "Could not read stack outputs, keeping previous"
                );
                OutputsChange::Keep
            }
        };
        attempt.state = LifecycleState::Converged(StackUpdateStatus::Succeeded);
        Ok(attempt.finish(StackUpdateStatus::Succeeded, outputs, None))
    }

    async fn converge_destroy(
        controller: &mut dyn StackController,
        cancel: &CancellationToken,
        attempt: &mut Attempt,
    ) -> Result<AttemptOutcome> {
        let summary = match controller.destroy_stack().or_cancel(cancel).await {
            Ok(summary) => summary,
            Err(Error::Cancelled) => return Err(Error::Cancelled),
            Err(e) => return Ok(Self::classified(attempt, e)),
        };
        attempt.keep_permalink(&summary);
        attempt.state = LifecycleState::Destroyed;
        Ok(attempt.finish(StackUpdateStatus::Succeeded, OutputsChange::Clear, None))
    }

    fn classified(attempt: &mut Attempt, err: Error) -> AttemptOutcome {
        let status = StackUpdateStatus::from_error(&err);
        warn!(attempt = %attempt.id, status = %status, error = %err, "Engine run failed");
        attempt.state = LifecycleState::Converged(status);
        attempt.finish(status, OutputsChange::Keep, Some(err))
    }
}
