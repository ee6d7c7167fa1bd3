//! Workers that drive stacks to a settled state, one worker per stack.

use stackop_core::stack::StackKey;
use stackop_core::{Error, Result};
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::reconciler::{Reconciled, Reconciler};

/// Reconciles one stack until it no longer asks to be requeued.
pub struct Worker {
    key: StackKey,
    reconciler: Arc<Reconciler>,
    max_attempts: Option<u32>,
}

impl Worker {
    pub fn new(key: StackKey, reconciler: Arc<Reconciler>) -> Self {
        Self {
            key,
            reconciler,
            max_attempts: None,
        }
    }

    /// Stop after `max` attempts even if the last one asked to be requeued.
    pub fn with_max_attempts(mut self, max: u32) -> Self {
        self.max_attempts = Some(max);
        self
    }

    /// Run the worker loop. Every attempt reloads the stack from the store.
    pub async fn run(&self, cancel: &CancellationToken) -> Result<Reconciled> {
        info!(stack = %self.key, "Starting worker");
        let mut attempts = 0u32;

        loop {
            attempts += 1;
            let reconciled = self.reconciler.reconcile_key(&self.key, cancel).await?;

            let Some(delay) = reconciled.requeue_after else {
                info!(stack = %self.key, attempts, "Stack settled");
                return Ok(reconciled);
            };

            if self.max_attempts.is_some_and(|max| attempts >= max) {
                warn!(stack = %self.key, attempts, "Giving up after maximum attempts");
                return Ok(reconciled);
            }

            tokio::select! {
                _ = cancel.cancelled() => return Err(Error::Cancelled),
                _ = sleep(delay) => {}
            }
        }
    }
}

/// Spawns workers, never more than one in flight per stack.
#[derive(Clone)]
pub struct Dispatcher {
    reconciler: Arc<Reconciler>,
    in_flight: Arc<Mutex<HashSet<StackKey>>>,
    max_attempts: Option<u32>,
}

/// Removes a key from the in-flight set when its worker ends.
struct InFlight {
    key: StackKey,
    set: Arc<Mutex<HashSet<StackKey>>>,
}

impl Drop for InFlight {
    fn drop(&mut self) {
        let mut set = self.set.lock().unwrap_or_else(|e| e.into_inner());
        set.remove(&self.key);
    }
}

impl Dispatcher {
    pub fn new(reconciler: Arc<Reconciler>) -> Self {
        Self {
            reconciler,
            in_flight: Arc::new(Mutex::new(HashSet::new())),
            max_attempts: None,
        }
    }

    pub fn with_max_attempts(mut self, max: u32) -> Self {
        self.max_attempts = Some(max);
        self
    }

    pub fn is_in_flight(&self, key: &StackKey) -> bool {
        let set = self.in_flight.lock().unwrap_or_else(|e| e.into_inner());
        set.contains(key)
    }

    /// Start a worker for `key`. Returns `None` if one is already running.
    pub fn dispatch(
        &self,
        key: StackKey,
        cancel: CancellationToken,
    ) -> Option<JoinHandle<Result<Reconciled>>> {
        {
            let mut set = self.in_flight.lock().unwrap_or_else(|e| e.into_inner());
            if !set.insert(key.clone()) {
                info!(stack = %key, "Worker already in flight, skipping");
                return None;
            }
        }

        let guard = InFlight {
            key: key.clone(),
            set: self.in_flight.clone(),
        };
        let mut worker = Worker::new(key, self.reconciler.clone());
        if let Some(max) = self.max_attempts {
            worker = worker.with_max_attempts(max);
        }

        Some(tokio::spawn(async move {
            let _guard = guard;
            worker.run(&cancel).await
        }))
    }

    /// Reconcile every key concurrently and wait for all of them.
    pub async fn run_all(
        &self,
        keys: Vec<StackKey>,
        cancel: &CancellationToken,
    ) -> Vec<(StackKey, Result<Reconciled>)> {
        let handles: Vec<_> = keys
            .into_iter()
            .filter_map(|key| {
                let handle = self.dispatch(key.clone(), cancel.clone())?;
                Some((key, handle))
            })
            .collect();

        let mut results = Vec::with_capacity(handles.len());
        for (key, handle) in handles {
            let result = match handle.await {
                Ok(result) => result,
                Err(e) => Err(Error::Internal(format!("worker for {key} panicked: {e}"))),
            };
            results.push((key, result));
        }
        results
    }
}
