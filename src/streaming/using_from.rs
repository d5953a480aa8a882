//! Synchronous streaming adapter.

use std::convert::Infallible;
use std::fmt;
use std::iter::{FusedIterator, Map};
use std::ops::ControlFlow;

use crate::capability::Candidate;
use crate::error::{BoxError, Error, ScopeError};
use crate::record::{Mode, Record};
use crate::stack::DisposableStack;

/// An iterator that scopes each item of a source to one step.
///
/// Yields `Ok(item)` for every item pulled from the source. The candidate
/// mapped from an item is disposed right before the following pull.
///
/// # Example
///
/// ```rust
/// use std::sync::Arc;
/// use disposable::{Candidate, DisposableStack};
/// use disposable::testing::{DisposalLog, Probe};
///
/// let log = DisposalLog::new();
/// let files = ["a.txt", "b.txt"].map(|name| Arc::new(log.probe(name)));
///
/// for file in DisposableStack::using_from(files, |f: &Arc<Probe>| Candidate::dispose(f.clone())) {
///     let file = file.unwrap();
///     log.push(format!("read {}", file.name()));
/// }
///
/// assert_eq!(
///     log.entries(),
///     vec!["read a.txt", "a.txt", "read b.txt", "b.txt"]
/// );
/// ```
pub struct UsingFrom<I, F> {
    source: Option<I>,
    map: F,
    pending: Option<Record>,
}

impl<I, F, T, E> UsingFrom<I, F>
where
    I: Iterator<Item = Result<T, E>>,
    E: Into<BoxError>,
    F: FnMut(&T) -> Candidate,
{
    pub(crate) fn new(source: I, map: F) -> Self {
        UsingFrom {
            source: Some(source),
            map,
            pending: None,
        }
    }

    /// Pull the next item, disposing the previous one first.
    pub fn advance(&mut self) -> Result<Option<T>, Error> {
        if let Err(e) = self.dispose_pending() {
            self.source = None;
            return Err(e);
        }
        let Some(source) = self.source.as_mut() else {
            return Ok(None);
        };
        match source.next() {
            None => {
                self.source = None;
                Ok(None)
            }
            Some(Err(e)) => {
                self.source = None;
                Err(Error::Source(e.into()))
            }
            Some(Ok(value)) => match Record::recognize((self.map)(&value), Mode::Sync) {
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

    /// Visit every item with its cleanup scoped around `body`.
    ///
    /// `body` stops the iteration early by returning
    /// `ControlFlow::Break(())`. A body error closes the adapter and wins
    /// over any cleanup failure. Failures of the adapter itself (source,
    /// recognition, cleanup) are returned as [`ScopeError::Dispose`].
    pub fn for_each_scoped<B, E2>(mut self, mut body: B) -> Result<(), ScopeError<E2>>
    where
        B: FnMut(T) -> Result<ControlFlow<()>, E2>,
    {
        loop {
            let value = match self.advance() {
                Ok(Some(value)) => value,
                Ok(None) => return Ok(()),
                Err(e) => return Err(ScopeError::Dispose(e)),
            };
            match body(value) {
                Ok(ControlFlow::Continue(())) => {}
                Ok(ControlFlow::Break(())) => return self.close().map_err(ScopeError::Dispose),
                Err(error) => return Err(self.close_with_error(error)),
            }
        }
    }
}

impl<I, F> UsingFrom<I, F> {
    /// Stop early: dispose the live item, then drop the source.
    pub fn close(&mut self) -> Result<(), Error> {
        let disposed = self.dispose_pending();
        self.source = None;
        disposed
    }

    /// Stop because the consumer failed with `error`.
    ///
    /// The live item is disposed. `error` is returned as the primary failure
    /// with any cleanup failure attached as `suppressed`.
    pub fn close_with_error<E2>(&mut self, error: E2) -> ScopeError<E2> {
        ScopeError::Body {
            error,
            suppressed: self.close().err(),
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

    fn dispose_pending(&mut self) -> Result<(), Error> {
        match self.pending.take() {
            Some(record) => record.dispose_blocking().map_err(Error::Dispose),
            None => Ok(()),
        }
    }
}

impl<I, F, T, E> Iterator for UsingFrom<I, F>
where
    I: Iterator<Item = Result<T, E>>,
    E: Into<BoxError>,
    F: FnMut(&T) -> Candidate,
{
    type Item = Result<T, Error>;

    fn next(&mut self) -> Option<Self::Item> {
        self.advance().transpose()
    }
}

impl<I, F, T, E> FusedIterator for UsingFrom<I, F>
where
    I: Iterator<Item = Result<T, E>>,
    E: Into<BoxError>,
    F: FnMut(&T) -> Candidate,
{
}

impl<I, F> Drop for UsingFrom<I, F> {
    fn drop(&mut self) {
        if let Err(error) = self.close() {
            tracing::warn!(%error, "cleanup failed while dropping a streaming adapter");
        }
    }
}

impl<I, F> fmt::Debug for UsingFrom<I, F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UsingFrom")
            .field("closed", &self.is_closed())
            .field("pending", &self.pending)
            .field("map", &"<function>")
            .finish()
    }
}

impl DisposableStack {
    /// Scope each item of `items` to one iteration step.
    pub fn using_from<I, T, F>(
        items: I,
        map: F,
    ) -> UsingFrom<Map<I::IntoIter, fn(T) -> Result<T, Infallible>>, F>
    where
        I: IntoIterator<Item = T>,
        F: FnMut(&T) -> Candidate,
    {
        let lift: fn(T) -> Result<T, Infallible> = Ok;
        UsingFrom::new(items.into_iter().map(lift), map)
    }

    /// Like [`using_from`](Self::using_from) for a fallible source.
    ///
    /// A source error is yielded as [`Error::Source`] after the live item
    /// has been disposed, and ends the iteration.
    pub fn try_using_from<I, T, E, F>(items: I, map: F) -> UsingFrom<I::IntoIter, F>
    where
        I: IntoIterator<Item = Result<T, E>>,
        E: Into<BoxError>,
        F: FnMut(&T) -> Candidate,
    {
        UsingFrom::new(items.into_iter(), map)
    }
}
