//! Declarative store contract for Stack resources.

use async_trait::async_trait;

use crate::stack::{Stack, StackKey, StackStatus};
use crate::Result;

/// Holds Stack specs and their observed status.
#[async_trait]
pub trait StackStore: Send + Sync {
    /// Fetch the current resource, including its last recorded status.
    async fn get(&self, key: &StackKey) -> Result<Stack>;

    /// Replace the status of a resource.
    async fn update_status(&self, key: &StackKey, status: &StackStatus) -> Result<()>;

    /// List every stored resource key.
    async fn list(&self) -> Result<Vec<StackKey>>;
}
