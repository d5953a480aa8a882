//! Asynchronous streaming adapter.

use std::convert::Infallible;
use std::fmt;
use std::future::Future;
use std::iter::Map;
use std::ops::ControlFlow;
use std::pin::Pin;

use futures::stream::{self, Stream, StreamExt};

use crate::capability::Candidate;
use crate::error::{BoxError, Error, ScopeError};
use crate::record::{Mode, Record};
use crate::stack::{dispose_detached, AsyncDisposableStack};

/// Per-item scoped disposal over a [`Stream`].
///
/// Same contract as [`UsingFrom`](crate::UsingFrom), with every cleanup and
/// every pull awaited. Only one pull or one cleanup is in flight at a time.
pub struct AsyncUsingFrom<S, F> {
    source: Option<Pin<Box<S>>>,
    map: F,
    pending: Option<Record>,
}

impl<S, F, T, E> AsyncUsingFrom<S, F>
where
    S: Stream<Item = Result<T, E>>,
    E: Into<BoxError>,
    F: FnMut(&T) -> Candidate,
{
    pub(crate) fn new(source: S, map: F) -> Self {
        AsyncUsingFrom {
            source: Some(Box::pin(source)),
            map,
            pending: None,
        }
    }

    /// Pull the next item, awaiting the previous item's cleanup first.
    pub async fn advance(&mut self) -> Result<Option<T>, Error> {
        if let Err(e) = self.dispose_pending().await {
            self.source = None;
            return Err(e);
        }
        let Some(source) = self.source.as_mut() else {
            return Ok(None);
        };
        match source.next().await {
            None => {
                self.source = None;
                Ok(None)
            }
            Some(Err(e)) => {
                self.source = None;
                Err(Error::Source(e.into()))
            }
            Some(Ok(value)) => match Record::recognize((self.map)(&value), Mode::Async) {
                Ok(record) => {
                    self.pending = Some(record);
                    Ok(Some(value))
                }
                Err(e) => {
                    self.source = None;
                    Err(e.into())
                }
            },
        }
    }

    /// Like [`advance`](Self::advance), shaped like `StreamExt::next`.
    pub async fn next(&mut self) -> Option<Result<T, Error>> {
        self.advance().await.transpose()
    }

    /// Visit every item with its cleanup scoped around `body`.
    ///
    /// See [`UsingFrom::for_each_scoped`](crate::UsingFrom::for_each_scoped).
    pub async fn for_each_scoped<B, Fut, E2>(mut self, mut body: B) -> Result<(), ScopeError<E2>>
    where
        B: FnMut(T) -> Fut,
        Fut: Future<Output = Result<ControlFlow<()>, E2>>,
    {
        loop {
            let value = match self.advance().await {
                Ok(Some(value)) => value,
                Ok(None) => return Ok(()),
                Err(e) => return Err(ScopeError::Dispose(e)),
            };
            match body(value).await {
                Ok(ControlFlow::Continue(())) => {}
                Ok(ControlFlow::Break(())) => {
                    return self.close().await.map_err(ScopeError::Dispose)
                }
                Err(error) => return Err(self.close_with_error(error).await),
            }
        }
    }
}

impl<S, F> AsyncUsingFrom<S, F> {
    /// Stop early: await the live item's cleanup, then drop the source.
    pub async fn close(&mut self) -> Result<(), Error> {
        let disposed = self.dispose_pending().await;
        self.source = None;
        disposed
    }

    /// Stop because the consumer failed with `error`.
    pub async fn close_with_error<E2>(&mut self, error: E2) -> ScopeError<E2> {
        ScopeError::Body {
            error,
            suppressed: self.close().await.err(),
        }
    }

    /// Returns true if an item is live and awaiting disposal.
    pub fn has_pending(&self) -> bool {
        self.pending.is_some()
    }

    /// Returns true once the source has been exhausted, failed or closed.
    pub fn is_closed(&self) -> bool {
        self.source.is_none()
    }

    async fn dispose_pending(&mut self) -> Result<(), Error> {
        match self.pending.take() {
            Some(record) => record.dispose().await.map_err(Error::Dispose),
            None => Ok(()),
        }
    }
}

impl<S, F> Drop for AsyncUsingFrom<S, F> {
    fn drop(&mut self) {
        if let Some(record) = self.pending.take() {
            tracing::warn!("streaming adapter dropped with a live item; disposing without awaiting");
            // a cleanup handed to the runtime may finish after the source is gone
            if let Err(error) = dispose_detached(vec![record]) {
                tracing::warn!(%error, "cleanup failed while dropping a streaming adapter");
            }
        }
        self.source = None;
    }
}

impl<S, F> fmt::Debug for AsyncUsingFrom<S, F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AsyncUsingFrom")
            .field("closed", &self.is_closed())
            .field("pending", &self.pending)
            .field("map", &"<function>")
            .finish()
    }
}

impl AsyncDisposableStack {
    /// Scope each item of `items` to one step of an async loop.
    pub fn using_from<I, T, F>(
        items: I,
        map: F,
    ) -> AsyncUsingFrom<stream::Iter<Map<I::IntoIter, fn(T) -> Result<T, Infallible>>>, F>
    where
        I: IntoIterator<Item = T>,
        F: FnMut(&T) -> Candidate,
    {
        let lift: fn(T) -> Result<T, Infallible> = Ok;
        AsyncUsingFrom::new(stream::iter(items.into_iter().map(lift)), map)
    }

    /// Scope each item of a fallible stream to one step of an async loop.
    pub fn using_from_stream<S, T, E, F>(items: S, map: F) -> AsyncUsingFrom<S, F>
    where
        S: Stream<Item = Result<T, E>>,
        E: Into<BoxError>,
        F: FnMut(&T) -> Candidate,
    {
        AsyncUsingFrom::new(items, map)
    }
}
