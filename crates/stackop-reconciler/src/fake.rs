//! In-memory stand-ins for the engine and source control.
//!
//! `FakeEngine` opens controllers that share one scripted state, so a test
//! can queue results before a reconcile and inspect the calls afterwards.

use async_trait::async_trait;
use stackop_core::controller::{ControllerFactory, RunSummary, StackController};
use stackop_core::source::{Checkout, SourcePreparer, SourceRequest};
use stackop_core::stack::{StackConfig, StackOutputs, StackSpec};
use stackop_core::{Error, Result};
use std::collections::{BTreeMap, VecDeque};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::Notify;

#[derive(Default)]
struct EngineState {
    calls: Vec<String>,
    checked_in: StackConfig,
    applied: StackConfig,
    envs: BTreeMap<String, String>,
    selected: Option<(String, Option<String>)>,
    outputs: StackOutputs,
    updates: VecDeque<Result<RunSummary>>,
    destroys: VecDeque<Result<RunSummary>>,
    install_error: Option<Error>,
    outputs_error: Option<Error>,
    refresh_changes: bool,
    opened: usize,
}

/// Scripted engine. Cloning shares the script.
#[derive(Clone, Default)]
pub struct FakeEngine {
    state: Arc<Mutex<EngineState>>,
    gate: Option<Arc<Notify>>,
}

impl FakeEngine {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, EngineState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Configuration the project has checked in.
    pub fn with_checked_in_config(self, config: StackConfig) -> Self {
        self.state().checked_in = config;
        self
    }

    pub fn with_outputs(self, outputs: StackOutputs) -> Self {
        self.state().outputs = outputs;
        self
    }

    /// Refreshes report changes.
    pub fn with_refresh_changes(self) -> Self {
        self.state().refresh_changes = true;
        self
    }

    pub fn with_install_error(self, err: Error) -> Self {
        self.state().install_error = Some(err);
        self
    }

    /// Fail every output read with `err`.
    pub fn with_outputs_error(self, err: Error) -> Self {
        self.state().outputs_error = Some(err);
        self
    }

    /// Hold every update until the gate is notified.
    pub fn with_gate(mut self, gate: Arc<Notify>) -> Self {
        self.gate = Some(gate);
        self
    }

    /// Queue the result of the next update. Updates succeed once the queue is empty.
    pub fn push_update(&self, result: Result<RunSummary>) -> &Self {
        self.state().updates.push_back(result);
        self
    }

    /// Queue the result of the next destroy.
    pub fn push_destroy(&self, result: Result<RunSummary>) -> &Self {
        self.state().destroys.push_back(result);
        self
    }

    /// Every controller call so far, in order.
    pub fn calls(&self) -> Vec<String> {
        self.state().calls.clone()
    }

    pub fn count(&self, call: &str) -> usize {
        self.state().calls.iter().filter(|c| *c == call).count()
    }

    /// Configuration last written by `update_config`.
    pub fn applied_config(&self) -> StackConfig {
        self.state().applied.clone()
    }

    pub fn envs(&self) -> BTreeMap<String, String> {
        self.state().envs.clone()
    }

    /// Stack name and secrets provider of the last `select_stack`.
    pub fn selected(&self) -> Option<(String, Option<String>)> {
        self.state().selected.clone()
    }

    /// Number of controllers opened.
    pub fn opened(&self) -> usize {
        self.state().opened
    }

    fn record(&self, call: &str) {
        self.state().calls.push(call.to_string());
    }
}

#[async_trait]
impl ControllerFactory for FakeEngine {
    async fn open(
        &self,
        _checkout: &Checkout,
        _spec: &StackSpec,
    ) -> Result<Box<dyn StackController>> {
        self.state().opened += 1;
        Ok(Box::new(FakeController {
            engine: self.clone(),
        }))
    }
}

/// Controller handed out by [`FakeEngine`].
pub struct FakeController {
    engine: FakeEngine,
}

#[async_trait]
impl StackController for FakeController {
    fn name(&self) -> &'static str {
        "fake"
    }

    async fn install_project_dependencies(&mut self) -> Result<()> {
        self.engine.record("install");
        match self.engine.state().install_error.clone() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    async fn set_envs(&mut self, envs: &BTreeMap<String, String>) -> Result<()> {
        self.engine.record("set_envs");
        self.engine
            .state()
            .envs
            .extend(envs.iter().map(|(k, v)| (k.clone(), v.clone())));
        Ok(())
    }

    async fn select_stack(&mut self, stack: &str, secrets_provider: Option<&str>) -> Result<()> {
        self.engine.record("select_stack");
        self.engine.state().selected =
            Some((stack.to_string(), secrets_provider.map(str::to_string)));
        Ok(())
    }

    async fn get_config(&mut self) -> Result<StackConfig> {
        self.engine.record("get_config");
        Ok(self.engine.state().checked_in.clone())
    }

    async fn update_config(&mut self, config: &StackConfig) -> Result<()> {
        self.engine.record("update_config");
        self.engine.state().applied = config.clone();
        Ok(())
    }

    async fn refresh_stack(&mut self, expect_no_changes: bool) -> Result<RunSummary> {
        self.engine.record("refresh");
        if expect_no_changes && self.engine.state().refresh_changes {
            return Err(Error::RefreshDrift(
                "no changes were expected but changes occurred".to_string(),
            ));
        }
        Ok(RunSummary::default())
    }

    async fn update_stack(&mut self) -> Result<RunSummary> {
        self.engine.record("update");
        if let Some(gate) = &self.engine.gate {
            gate.notified().await;
        }
        let next = self.engine.state().updates.pop_front();
        next.unwrap_or_else(|| Ok(RunSummary::default()))
    }

    async fn get_stack_outputs(&mut self) -> Result<StackOutputs> {
        self.engine.record("outputs");
        let state = self.engine.state();
        match &state.outputs_error {
            Some(err) => Err(err.clone()),
            None => Ok(state.outputs.clone()),
        }
    }

    async fn destroy_stack(&mut self) -> Result<RunSummary> {
        self.engine.record("destroy");
        let next = self.engine.state().destroys.pop_front();
        next.unwrap_or_else(|| Ok(RunSummary::default()))
    }
}

#[derive(Default)]
struct SourceState {
    requests: Vec<SourceRequest>,
    released: usize,
    error: Option<Error>,
}

/// Source preparer that hands out a fixed commit without touching disk.
#[derive(Clone)]
pub struct FakeSourcePreparer {
    commit: String,
    state: Arc<Mutex<SourceState>>,
}

impl FakeSourcePreparer {
    pub fn new(commit: impl Into<String>) -> Self {
        Self {
            commit: commit.into(),
            state: Arc::new(Mutex::new(SourceState::default())),
        }
    }

    fn state(&self) -> MutexGuard<'_, SourceState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Fail every preparation with `err`.
    pub fn failing(self, err: Error) -> Self {
        self.state().error = Some(err);
        self
    }

    pub fn requests(&self) -> Vec<SourceRequest> {
        self.state().requests.clone()
    }

    pub fn released(&self) -> usize {
        self.state().released
    }
}

#[async_trait]
impl SourcePreparer for FakeSourcePreparer {
    fn name(&self) -> &'static str {
        "fake"
    }

    async fn prepare(&self, request: &SourceRequest) -> Result<Checkout> {
        let mut state = self.state();
        state.requests.push(request.clone());
        if let Some(err) = state.error.clone() {
            return Err(err);
        }

        let root = PathBuf::from("/fake/checkout");
        let work_dir = match &request.repo_dir {
            Some(dir) => root.join(dir),
            None => root.clone(),
        };
        Ok(Checkout {
            root,
            work_dir,
            commit: request
                .revision
                .pinned_commit()
                .map(str::to_string)
                .unwrap_or_else(|| self.commit.clone()),
        })
    }

    async fn release(&self, _checkout: &Checkout) -> Result<()> {
        self.state().released += 1;
        Ok(())
    }
}
