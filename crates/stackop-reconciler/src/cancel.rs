//! Cancellation-aware futures.

use async_trait::async_trait;
use stackop_core::{Error, Result};
use std::future::Future;
use tokio_util::sync::CancellationToken;

/// Race a fallible future against a [`CancellationToken`].
///
/// A cancelled token wins and yields [`Error::Cancelled`]; the losing future
/// is dropped, which kills any child process it spawned with `kill_on_drop`.
#[async_trait]
pub trait OrCancelExt: Sized {
    type Value;

    async fn or_cancel(self, token: &CancellationToken) -> Result<Self::Value>;
}

#[async_trait]
impl<F, T> OrCancelExt for F
where
    F: Future<Output = Result<T>> + Send,
    T: Send,
{
    type Value = T;

    async fn or_cancel(self, token: &CancellationToken) -> Result<T> {
        tokio::select! {
            biased;
            _ = token.cancelled() => Err(Error::Cancelled),
            res = self => res,
        }
    }
}
