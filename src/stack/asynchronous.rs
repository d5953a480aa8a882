//! The asynchronous disposal stack.
//!
//! Holds async records and sync records side by side. During
//! [`AsyncDisposableStack::dispose`] sync records run inline and async records
//! are awaited, one at a time, most recent first.

use std::convert::Infallible;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use futures::future::FutureExt;
use futures::stream::{self, Stream, StreamExt};

use super::{dispose_detached, drop_pending, rollback_error, track, unwind_async, DropPolicy, Shared};
use crate::capability::{AsyncDispose, Callback, Candidate, Dispose};
use crate::error::{AlreadyDisposed, BoxError, Error};
use crate::record::{Mode, Record};

// ============================================================================
// AsyncAdder
// ============================================================================

/// A detachable handle for adding to an [`AsyncDisposableStack`].
///
/// Adding never awaits. If the stack was already disposed, the value is
/// disposed on the spot and [`Error::AlreadyDisposed`] is returned. Inside a
/// tokio runtime an async cleanup is spawned onto that runtime instead of
/// being awaited, so its failure is logged rather than attached as the
/// error's cause.
#[derive(Clone)]
pub struct AsyncAdder {
    shared: Arc<Shared>,
}

impl AsyncAdder {
    /// Recognize `value` and push it.
    ///
    /// The candidate is consumed. Use [`use_resource`](Self::use_resource),
    /// [`use_async`](Self::use_async) or [`adopt`](Self::adopt) to get the
    /// tracked value back.
    pub fn add(&self, value: impl Into<Candidate>) -> Result<(), Error> {
        let record = Record::recognize(value.into(), Mode::Async)?;
        track(&self.shared, record)
    }

    /// Track a synchronous resource.
    pub fn use_resource<R: Dispose + 'static>(&self, resource: R) -> Result<Arc<R>, Error> {
        let resource = Arc::new(resource);
        self.add(Candidate::dispose(resource.clone()))?;
        Ok(resource)
    }

    /// Track an asynchronous resource.
    pub fn use_async<R: AsyncDispose + 'static>(&self, resource: R) -> Result<Arc<R>, Error> {
        let resource = Arc::new(resource);
        self.add(Candidate::async_dispose(resource.clone()))?;
        Ok(resource)
    }

    /// Track a value with a synchronous caller-supplied cleanup.
    pub fn adopt<V, F>(&self, value: V, on_dispose: F) -> Result<Arc<V>, Error>
    where
        V: Send + Sync + 'static,
        F: FnOnce(&V) -> Result<(), BoxError> + Send + 'static,
    {
        let value = Arc::new(value);
        track(&self.shared, Record::adopt(value.clone(), on_dispose))?;
        Ok(value)
    }

    /// Track a value with an asynchronous caller-supplied cleanup.
    pub fn adopt_async<V, F, Fut>(&self, value: V, on_dispose: F) -> Result<Arc<V>, Error>
    where
        V: Send + Sync + 'static,
        F: FnOnce(Arc<V>) -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), BoxError>> + Send + 'static,
    {
        let value = Arc::new(value);
        track(&self.shared, Record::adopt_async(value.clone(), on_dispose))?;
        Ok(value)
    }

    /// Track a synchronous cleanup callback.
    pub fn defer<F>(&self, on_dispose: F) -> Result<(), Error>
    where
        F: FnOnce() -> Result<(), BoxError> + Send + 'static,
    {
        self.add(Callback::from_fn(on_dispose))
    }

    /// Track an asynchronous cleanup callback.
    pub fn defer_async<F, Fut>(&self, on_dispose: F) -> Result<(), Error>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), BoxError>> + Send + 'static,
    {
        self.add(Callback::from_async(on_dispose))
    }

    /// Returns true once the owning stack has been disposed.
    pub fn is_disposed(&self) -> bool {
        self.shared.is_disposed()
    }
}

impl fmt::Debug for AsyncAdder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AsyncAdder").field("stack", &self.shared).finish()
    }
}

// ============================================================================
// AsyncDisposableStack
// ============================================================================

/// An ordered stack of cleanups that may need awaiting.
///
/// # Example
///
/// ```rust
/// use disposable::AsyncDisposableStack;
///
/// # tokio_test::block_on(async {
/// let stack = AsyncDisposableStack::new();
/// stack
///     .defer_async(|| async {
///         // flush buffered writes
///         Ok(())
///     })
///     .unwrap();
///
/// stack.dispose().await.unwrap();
/// assert!(stack.is_disposed());
/// # });
/// ```
pub struct AsyncDisposableStack {
    adder: AsyncAdder,
    drop_policy: DropPolicy,
}

impl AsyncDisposableStack {
    /// Create an empty stack.
    pub fn new() -> Self {
        Self::from_records(Vec::new())
    }

    /// Create a stack seeded with a single asynchronous cleanup.
    pub fn with_callback<F, Fut>(on_dispose: F) -> Self
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), BoxError>> + Send + 'static,
    {
        Self::from_records(vec![Record::Async(Box::new(move || on_dispose().boxed()))])
    }

    pub(crate) fn from_records(records: Vec<Record>) -> Self {
        AsyncDisposableStack {
            adder: AsyncAdder {
                shared: Shared::new(records),
            },
            drop_policy: DropPolicy::default(),
        }
    }

    /// Choose what happens if the stack is dropped while still pending.
    ///
    /// `Drop` cannot await. Under [`DropPolicy::Dispose`] async records are
    /// spawned onto the current tokio runtime, or driven with a blocking
    /// executor when no executor is running. Inside any other executor they
    /// are leaked with a warning. Dispose explicitly wherever possible.
    pub fn on_drop(mut self, policy: DropPolicy) -> Self {
        self.drop_policy = policy;
        self
    }

    /// Recognize `value` and push it.
    ///
    /// The candidate is consumed. Use [`use_resource`](Self::use_resource),
    /// [`use_async`](Self::use_async) or [`adopt`](Self::adopt) to get the
    /// tracked value back.
    pub fn add(&self, value: impl Into<Candidate>) -> Result<(), Error> {
        self.adder.add(value)
    }

    /// Track a synchronous resource.
    pub fn use_resource<R: Dispose + 'static>(&self, resource: R) -> Result<Arc<R>, Error> {
        self.adder.use_resource(resource)
    }

    /// Track an asynchronous resource.
    pub fn use_async<R: AsyncDispose + 'static>(&self, resource: R) -> Result<Arc<R>, Error> {
        self.adder.use_async(resource)
    }

    /// Track a value with a synchronous caller-supplied cleanup.
    pub fn adopt<V, F>(&self, value: V, on_dispose: F) -> Result<Arc<V>, Error>
    where
        V: Send + Sync + 'static,
        F: FnOnce(&V) -> Result<(), BoxError> + Send + 'static,
    {
        self.adder.adopt(value, on_dispose)
    }

    /// Track a value with an asynchronous caller-supplied cleanup.
    pub fn adopt_async<V, F, Fut>(&self, value: V, on_dispose: F) -> Result<Arc<V>, Error>
    where
        V: Send + Sync + 'static,
        F: FnOnce(Arc<V>) -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), BoxError>> + Send + 'static,
    {
        self.adder.adopt_async(value, on_dispose)
    }

    /// Track a synchronous cleanup callback.
    pub fn defer<F>(&self, on_dispose: F) -> Result<(), Error>
    where
        F: FnOnce() -> Result<(), BoxError> + Send + 'static,
    {
        self.adder.defer(on_dispose)
    }

    /// Track an asynchronous cleanup callback.
    pub fn defer_async<F, Fut>(&self, on_dispose: F) -> Result<(), Error>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), BoxError>> + Send + 'static,
    {
        self.adder.defer_async(on_dispose)
    }

    /// A detachable handle that adds to this stack.
    pub fn adder(&self) -> AsyncAdder {
        self.adder.clone()
    }

    /// Dispose every tracked resource, most recent first.
    ///
    /// Each async record is awaited before the next one starts. Does nothing
    /// if the stack was already disposed, including while another `dispose`
    /// call is still in progress.
    pub async fn dispose(&self) -> Result<(), Error> {
        match self.adder.shared.drain() {
            Some(records) => unwind_async(records).await,
            None => Ok(()),
        }
    }

    /// Dispose without awaiting, for callers running in `Drop`.
    ///
    /// See [`DropPolicy`] for where async records end up.
    pub(crate) fn dispose_detached(&self) -> Result<(), Error> {
        match self.adder.shared.drain() {
            Some(records) => dispose_detached(records),
            None => Ok(()),
        }
    }

    /// Move every pending record into a new stack.
    pub fn move_out(&self) -> Result<AsyncDisposableStack, Error> {
        match self.adder.shared.drain() {
            Some(records) => Ok(Self::from_records(records)),
            None => Err(AlreadyDisposed::new(None).into()),
        }
    }

    /// Returns true once the stack has been disposed.
    pub fn is_disposed(&self) -> bool {
        self.adder.shared.is_disposed()
    }

    /// Number of pending records.
    pub fn len(&self) -> usize {
        self.adder.shared.len()
    }

    /// Returns true if nothing is pending.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Build a stack from candidates, rolling back on any failure.
    pub async fn from_candidates<I, C>(items: I) -> Result<Self, Error>
    where
        I: IntoIterator<Item = C>,
        C: Into<Candidate>,
    {
        Self::from_resources(items, Into::into).await
    }

    /// Build a stack from `items`, mapping each one to a candidate.
    ///
    /// Same contract as
    /// [`DisposableStack::from_resources`](crate::DisposableStack::from_resources),
    /// except that the rollback is awaited.
    pub async fn from_resources<I, T, F>(items: I, map: F) -> Result<Self, Error>
    where
        I: IntoIterator<Item = T>,
        F: FnMut(T) -> Candidate,
    {
        Self::from_stream(stream::iter(items.into_iter().map(Ok::<T, Infallible>)), map).await
    }

    /// Build a stack from a fallible stream of values.
    ///
    /// Each item is awaited in turn. A stream error ends consumption and
    /// triggers the rollback.
    pub async fn from_stream<S, T, E, F>(items: S, mut map: F) -> Result<Self, Error>
    where
        S: Stream<Item = Result<T, E>>,
        E: Into<BoxError>,
        F: FnMut(T) -> Candidate,
    {
        let stack = Self::new();
        let mut failures = Vec::new();
        let mut items = std::pin::pin!(items);

        while let Some(item) = items.next().await {
            match item {
                Ok(value) => {
                    if let Err(e) = stack.add(map(value)) {
                        failures.push(e);
                    }
                }
                Err(e) => {
                    failures.push(Error::Source(e.into()));
                    break;
                }
            }
        }

        if failures.is_empty() {
            return Ok(stack);
        }
        tracing::debug!(
            failures = failures.len(),
            tracked = stack.len(),
            "rolling back partially built stack"
        );
        let disposal = stack.dispose().await;
        Err(rollback_error(failures, disposal))
    }
}

impl Default for AsyncDisposableStack {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for AsyncDisposableStack {
    fn drop(&mut self) {
        drop_pending(&self.adder.shared, self.drop_policy);
    }
}

impl fmt::Debug for AsyncDisposableStack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AsyncDisposableStack")
            .field("stack", &self.adder.shared)
            .field("drop_policy", &self.drop_policy)
            .finish()
    }
}
