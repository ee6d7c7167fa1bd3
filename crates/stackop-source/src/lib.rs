//! Project source preparation for stackop.
//!
//! Resolves git credentials from a Stack spec and materializes the project
//! at the requested revision with the `git` CLI.

pub mod auth;
pub mod git;

pub use auth::resolve_credentials;
pub use git::GitSourcePreparer;
