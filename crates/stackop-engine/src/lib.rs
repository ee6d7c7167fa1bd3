//! Provisioning engine integration for stackop.
//!
//! - [`PulumiController`]: the `StackController` over the `pulumi` CLI
//! - [`runtime`]: dependency installation per project runtime
//! - [`KubeSecretStore`]: secrets and config maps from a Kubernetes cluster

pub mod classify;
pub mod kubernetes;
pub mod pulumi;
pub mod runtime;

pub use kubernetes::KubeSecretStore;
pub use pulumi::{PulumiController, PulumiControllerFactory};
