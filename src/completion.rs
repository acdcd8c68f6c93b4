//! One-shot future returned by `Writer::queue`/`Emitter::send_*`.
//!
//! Wraps a `tokio::sync::oneshot::Receiver` rather than exposing a
//! completion-source object shared between the Writer and the caller:
//! the Writer holds only the paired `Sender`, keyed by message id,
//! never a handle into caller-owned state.

use crate::error::NetworkError;
use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::oneshot;

/// A one-shot handle resolving with `T` (ack confirmation, response
/// value, ...) or rejecting with a [`NetworkError`].
///
/// Settles exactly once: on ack/response it resolves; on ack/operation
/// timeout, connection-closed, or transport failure it rejects.
pub struct Completion<T> {
    inner: BoxFuture<'static, Result<T, NetworkError>>,
}

impl<T: Send + 'static> Completion<T> {
    pub(crate) fn from_receiver(rx: oneshot::Receiver<Result<T, NetworkError>>) -> Self {
        Self {
            inner: Box::pin(async move {
                match rx.await {
                    Ok(result) => result,
                    Err(_) => Err(NetworkError::ConnectionClosed),
                }
            }),
        }
    }

    /// Adapts a `Completion<T>` to a `Completion<U>` by mapping its
    /// success value, leaving rejections untouched. Used by [`Emitter`](crate::emitter::Emitter)
    /// to turn the Writer's raw `serde_json::Value` completions into the
    /// `()`/typed completions its public API promises.
    pub(crate) fn map<U, F>(self, f: F) -> Completion<U>
    where
        U: Send + 'static,
        F: FnOnce(T) -> U + Send + 'static,
    {
        Completion {
            inner: self.inner.map(|result| result.map(f)).boxed(),
        }
    }

    /// An already-settled completion, for callers (e.g. `Writer::send`
    /// failing synchronously to encode) that need to return a
    /// `Completion` without a pending oneshot.
    pub(crate) fn ready(result: Result<T, NetworkError>) -> Self {
        Self {
            inner: Box::pin(async move { result }),
        }
    }
}

impl<T> Future for Completion<T> {
    type Output = Result<T, NetworkError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        self.inner.as_mut().poll(cx)
    }
}
