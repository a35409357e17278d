use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use futures::future::{self, BoxFuture, FutureExt, Shared};

use crate::store::Settle;

/// What a producer hands back to the herd: either a result it already has, or a future of one.
pub enum Work<V, E> {
    /// The producer finished synchronously, successfully or not.
    Ready(Result<V, E>),
    /// The producer started asynchronous work.
    Pending(BoxFuture<'static, Result<V, E>>),
}

impl<V, E> Work<V, E> {
    /// A value that is available right away.
    pub fn ready(value: V) -> Self {
        Self::Ready(Ok(value))
    }

    /// A synchronous failure.
    pub fn failed(error: E) -> Self {
        Self::Ready(Err(error))
    }

    /// Asynchronous work that settles once `future` completes.
    pub fn pending<F>(future: F) -> Self
    where
        F: Future<Output = Result<V, E>> + Send + 'static,
    {
        Self::Pending(future.boxed())
    }
}

impl<V, E> From<Result<V, E>> for Work<V, E> {
    fn from(result: Result<V, E>) -> Self {
        Self::Ready(result)
    }
}

impl<V, E> fmt::Debug for Work<V, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ready(Ok(_)) => f.write_str("Work::Ready(Ok(..))"),
            Self::Ready(Err(_)) => f.write_str("Work::Ready(Err(..))"),
            Self::Pending(_) => f.write_str("Work::Pending(..)"),
        }
    }
}

/// A shared handle onto the outcome of one producer invocation.
///
/// Every clone resolves to the same value or error, no matter whether it was obtained before or
/// after the underlying work settled. Dropping a `Computation` never cancels the work for the
/// other holders.
pub struct Computation<V, E> {
    inner: Shared<BoxFuture<'static, Result<V, E>>>,
}

impl<V, E> Computation<V, E>
where
    V: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    /// Wraps a future that is driven by whoever polls the computation.
    pub(crate) fn new(future: BoxFuture<'static, Result<V, E>>) -> Self {
        Self {
            inner: future.shared(),
        }
    }

    /// Creates an already settled computation.
    pub(crate) fn settled(result: Result<V, E>) -> Self {
        let this = Self::new(future::ready(result).boxed());
        // drive the ready future once so that `peek` sees the outcome
        let _ = this.inner.clone().now_or_never();
        this
    }

    /// Whether the outcome is known.
    ///
    /// A pending computation makes progress while it is awaited or, once stored by a
    /// [`Herd`](crate::Herd) running inside a tokio runtime, in a background task.
    pub fn is_settled(&self) -> bool {
        self.inner.peek().is_some()
    }

    /// The outcome, if the computation has settled.
    pub fn peek(&self) -> Option<&Result<V, E>> {
        self.inner.peek()
    }

    /// Whether both handles refer to the same producer invocation.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        self.inner.ptr_eq(&other.inner)
    }
}

impl<V, E> Settle for Computation<V, E>
where
    V: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    fn is_settled(&self) -> bool {
        Computation::is_settled(self)
    }
}

impl<V, E> Clone for Computation<V, E> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<V, E> Future for Computation<V, E>
where
    V: Clone,
    E: Clone,
{
    type Output = Result<V, E>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.inner).poll(cx)
    }
}

impl<V, E> fmt::Debug for Computation<V, E>
where
    V: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match self.peek() {
            None => "pending",
            Some(Ok(_)) => "fulfilled",
            Some(Err(_)) => "rejected",
        };
        f.debug_struct("Computation").field("state", &state).finish()
    }
}
