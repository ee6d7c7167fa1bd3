//! Core domain types and traits for the stackop stack operator.
//!
//! This crate contains:
//! - The Stack resource (spec, status, update classification)
//! - Resource references and their selectors
//! - Capability traits for the engine, source control and secret backends
//! - The declarative store contract and the kind registry
//! - The error taxonomy shared by every other crate

pub mod controller;
pub mod error;
pub mod id;
pub mod registry;
pub mod resource;
pub mod secret;
pub mod source;
pub mod stack;
pub mod store;

pub use error::{Error, Result};
pub use id::AttemptId;
pub use resource::ResourceRef;
pub use stack::{Stack, StackKey, StackSpec, StackStatus, StackUpdateStatus};
