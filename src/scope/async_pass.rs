//! The asynchronous per-pass adapter.

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use super::PassState;
use crate::capability::AsyncDispose;
use crate::error::{BoxError, Error, ScopeError};
use crate::record::Record;
use crate::stack::{AsyncAdder, AsyncDisposableStack};

/// A single-yield adapter over a fresh [`AsyncDisposableStack`].
///
/// Works like [`Pass`](crate::Pass), with every step awaited. There is no
/// async `Drop`, so an unfinished pass that is dropped hands its async
/// cleanups to the current tokio runtime and logs failures from there. Sync
/// cleanups still run inline. See [`DropPolicy`](crate::DropPolicy) for the
/// case where no runtime is available.
pub struct AsyncPass<Y> {
    stack: AsyncDisposableStack,
    item: Y,
    state: PassState,
}

impl<Y: Clone> AsyncPass<Y> {
    pub(crate) fn new(stack: AsyncDisposableStack, item: Y) -> Self {
        AsyncPass {
            stack,
            item,
            state: PassState::NotYielded,
        }
    }

    fn enter(&mut self) -> Y {
        self.state = PassState::Yielded;
        self.item.clone()
    }

    /// Step the pass.
    ///
    /// Returns the item once, then `Ok(None)` after disposing the stack.
    pub async fn advance(&mut self) -> Result<Option<Y>, Error> {
        match self.state {
            PassState::NotYielded => Ok(Some(self.enter())),
            PassState::Yielded => self.finish().await.map(|()| None),
            PassState::Closed => Ok(None),
        }
    }

    /// Like [`advance`](Self::advance), shaped like `Iterator::next`.
    pub async fn next(&mut self) -> Option<Result<Y, Error>> {
        self.advance().await.transpose()
    }
}

impl<Y> AsyncPass<Y> {
    /// Close the pass early, disposing the stack.
    pub async fn close(&mut self) -> Result<(), Error> {
        match self.state {
            PassState::Closed => Ok(()),
            _ => self.finish().await,
        }
    }

    /// Close the pass because the body failed with `error`.
    ///
    /// `error` stays the primary failure; a cleanup failure is `suppressed`.
    pub async fn close_with_error<E>(&mut self, error: E) -> ScopeError<E> {
        let suppressed = match self.state {
            PassState::Closed => None,
            _ => self.finish().await.err(),
        };
        if let Some(cleanup) = &suppressed {
            tracing::debug!(%cleanup, "cleanup failure suppressed by body error");
        }
        ScopeError::Body { error, suppressed }
    }

    /// Current state.
    pub fn state(&self) -> PassState {
        self.state
    }

    /// Returns true once the stack has been disposed.
    pub fn is_closed(&self) -> bool {
        self.state == PassState::Closed
    }

    /// The stack owned by this pass.
    pub fn stack(&self) -> &AsyncDisposableStack {
        &self.stack
    }

    async fn finish(&mut self) -> Result<(), Error> {
        self.state = PassState::Closed;
        self.stack.dispose().await
    }
}

impl<Y> Drop for AsyncPass<Y> {
    fn drop(&mut self) {
        if self.state == PassState::Closed {
            return;
        }
        self.state = PassState::Closed;
        if !self.stack.is_empty() {
            tracing::warn!(
                pending = self.stack.len(),
                "async pass dropped before close; disposing without awaiting"
            );
        }
        if let Err(error) = self.stack.dispose_detached() {
            if std::thread::panicking() {
                tracing::error!(%error, "cleanup failed while unwinding from a panic");
            } else {
                tracing::warn!(%error, "cleanup failed while dropping an unfinished pass");
            }
        }
    }
}

impl<Y: fmt::Debug> fmt::Debug for AsyncPass<Y> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AsyncPass")
            .field("state", &self.state)
            .field("item", &self.item)
            .field("stack", &self.stack)
            .finish()
    }
}

impl AsyncDisposableStack {
    /// A pass over a fresh stack that yields its [`AsyncAdder`].
    pub fn pass() -> AsyncPass<AsyncAdder> {
        let stack = AsyncDisposableStack::new();
        let adder = stack.adder();
        AsyncPass::new(stack, adder)
    }

    /// A pass that yields `resource` itself and awaits its cleanup on close.
    pub fn using<R: AsyncDispose + 'static>(resource: R) -> AsyncPass<Arc<R>> {
        let resource = Arc::new(resource);
        let record = Record::adopt_async(resource.clone(), |r: Arc<R>| async move {
            r.dispose_async().await
        });
        AsyncPass::new(AsyncDisposableStack::from_records(vec![record]), resource)
    }

    /// A pass that yields `value` and awaits `on_dispose(value)` on close.
    pub fn using_with<V, F, Fut>(value: V, on_dispose: F) -> AsyncPass<Arc<V>>
    where
        V: Send + Sync + 'static,
        F: FnOnce(Arc<V>) -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), BoxError>> + Send + 'static,
    {
        let value = Arc::new(value);
        let record = Record::adopt_async(value.clone(), on_dispose);
        AsyncPass::new(AsyncDisposableStack::from_records(vec![record]), value)
    }

    /// Run `body` with an adder for a fresh stack, then await its disposal.
    ///
    /// On error the body's error wins and any cleanup failure is kept as
    /// `suppressed`. If the returned future is dropped mid-body, or the body
    /// panics, the stack is still disposed from `Drop` without awaiting.
    ///
    /// # Example
    ///
    /// ```rust
    /// use disposable::{AsyncDisposableStack, ScopeError};
    ///
    /// # tokio_test::block_on(async {
    /// let total = AsyncDisposableStack::scope(|adder| async move {
    ///     adder.defer_async(|| async { Ok(()) }).unwrap();
    ///     Ok::<_, std::io::Error>(40 + 2)
    /// })
    /// .await
    /// .unwrap();
    /// assert_eq!(total, 42);
    /// # });
    /// ```
    pub async fn scope<T, E, F, Fut>(body: F) -> Result<T, ScopeError<E>>
    where
        F: FnOnce(AsyncAdder) -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        run_scope(Self::pass(), body).await
    }

    /// Run `body` against a single async resource, then await its cleanup.
    pub async fn using_scope<R, T, E, F, Fut>(resource: R, body: F) -> Result<T, ScopeError<E>>
    where
        R: AsyncDispose + 'static,
        F: FnOnce(Arc<R>) -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        run_scope(Self::using(resource), body).await
    }
}

async fn run_scope<Y, T, E, F, Fut>(mut pass: AsyncPass<Y>, body: F) -> Result<T, ScopeError<E>>
where
    Y: Clone,
    F: FnOnce(Y) -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let item = pass.enter();
    match body(item).await {
        Ok(value) => match pass.close().await {
            Ok(()) => Ok(value),
            Err(e) => Err(ScopeError::Dispose(e)),
        },
        Err(error) => Err(pass.close_with_error(error).await),
    }
}
