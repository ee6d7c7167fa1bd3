//! Stack reconciliation for stackop.
//!
//! A reconcile runs one lifecycle attempt for a stack, records its outcome
//! as status, and tells the caller whether to requeue. Workers loop on that
//! decision; the dispatcher keeps at most one worker per stack.

pub mod cancel;
pub mod environment;
pub mod fake;
pub mod lifecycle;
pub mod reconciler;
pub mod status;
pub mod store;
pub mod worker;

pub use lifecycle::{AttemptOutcome, Lifecycle, LifecycleState, OutputsChange, RunMode};
pub use reconciler::{Action, Reconciled, Reconciler};
pub use store::{FileStackStore, MemoryStackStore};
pub use worker::{Dispatcher, Worker};
