//! Stack controller trait: the narrow contract with the provisioning engine.
//!
//! A controller operates one project checkout and one stack for the duration
//! of a single reconcile attempt. It is never reused across attempts.

use async_trait::async_trait;
use std::collections::BTreeMap;

use crate::source::Checkout;
use crate::stack::{Permalink, StackConfig, StackOutputs, StackSpec};
use crate::Result;

/// Result of a refresh, update or destroy run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    /// Link to the run in the engine's console, when the backend provides one.
    pub permalink: Option<Permalink>,
}

impl RunSummary {
    pub fn with_permalink(permalink: Permalink) -> Self {
        Self {
            permalink: Some(permalink),
        }
    }
}

/// Operations the lifecycle needs from the provisioning engine.
///
/// Errors from `update_stack` and `destroy_stack` are classified by the caller:
/// `EngineConflict`, `EnginePendingOperations` and `NotFound` carry meaning,
/// anything else is a failure.
#[async_trait]
pub trait StackController: Send {
    /// Name of this controller implementation.
    fn name(&self) -> &'static str;

    /// Install the package manager dependencies for the project's language.
    async fn install_project_dependencies(&mut self) -> Result<()>;

    /// Set environment variables for every later engine invocation.
    async fn set_envs(&mut self, envs: &BTreeMap<String, String>) -> Result<()>;

    /// Select the stack, creating it with the given secrets provider if it does not exist.
    async fn select_stack(&mut self, stack: &str, secrets_provider: Option<&str>) -> Result<()>;

    /// Configuration currently persisted for the stack (checked-in values included).
    async fn get_config(&mut self) -> Result<StackConfig>;

    /// Persist configuration values, overriding any existing value for the same key.
    async fn update_config(&mut self, config: &StackConfig) -> Result<()>;

    /// Refresh engine state. With `expect_no_changes`, changes are a `RefreshDrift` error.
    async fn refresh_stack(&mut self, expect_no_changes: bool) -> Result<RunSummary>;

    /// Deploy the stack's resources.
    async fn update_stack(&mut self) -> Result<RunSummary>;

    /// All of the stack's output properties.
    async fn get_stack_outputs(&mut self) -> Result<StackOutputs>;

    /// Destroy the stack's resources, then the stack itself.
    async fn destroy_stack(&mut self) -> Result<RunSummary>;
}

/// Opens a controller over a prepared checkout.
#[async_trait]
pub trait ControllerFactory: Send + Sync {
    async fn open(&self, checkout: &Checkout, spec: &StackSpec)
    -> Result<Box<dyn StackController>>;
}
