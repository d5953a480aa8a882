//! Capability tags and the resource conformance surface.
//!
//! A value is a resource when it publishes a cleanup callable under one of two
//! process-wide tags:
//!
//! - [`DISPOSE`] - synchronous cleanup, the [`Dispose`] trait
//! - [`ASYNC_DISPOSE`] - asynchronous cleanup, the [`AsyncDispose`] trait
//!
//! Values are offered to a stack as a [`Candidate`]. The stack recognizes the
//! candidate once, at the point of adding, and stores the result as a
//! [`Record`](crate::record::Record).
//!
//! # Example
//!
//! ```rust
//! use std::sync::atomic::{AtomicBool, Ordering};
//! use std::sync::Arc;
//! use disposable::{BoxError, Candidate, Capability, Dispose};
//!
//! struct Lock {
//!     held: AtomicBool,
//! }
//!
//! impl Dispose for Lock {
//!     fn dispose(&self) -> Result<(), BoxError> {
//!         self.held.store(false, Ordering::SeqCst);
//!         Ok(())
//!     }
//! }
//!
//! let lock = Arc::new(Lock { held: AtomicBool::new(true) });
//! let candidate = Candidate::dispose(lock);
//! assert_eq!(candidate.capability(), Some(Capability::Dispose));
//! ```

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use futures::future::{BoxFuture, FutureExt};

use crate::error::BoxError;
use crate::record::Mode;

/// One of the two distinguished capability tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Capability {
    /// Synchronous cleanup.
    Dispose,
    /// Asynchronous cleanup.
    AsyncDispose,
}

/// The synchronous disposal tag.
pub const DISPOSE: Capability = Capability::Dispose;

/// The asynchronous disposal tag.
pub const ASYNC_DISPOSE: Capability = Capability::AsyncDispose;

impl Capability {
    /// Stable, process-wide key for this tag.
    pub const fn key(self) -> &'static str {
        match self {
            Capability::Dispose => "disposable::dispose",
            Capability::AsyncDispose => "disposable::async_dispose",
        }
    }

    /// Execution mode of a callable published under this tag.
    pub const fn mode(self) -> Mode {
        match self {
            Capability::Dispose => Mode::Sync,
            Capability::AsyncDispose => Mode::Async,
        }
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

/// Synchronous cleanup, published under [`DISPOSE`].
///
/// Cleanup runs against a shared reference because the stack keeps the
/// resource behind an `Arc` that the caller also holds.
pub trait Dispose: Send + Sync {
    /// Release the resource.
    fn dispose(&self) -> Result<(), BoxError>;
}

/// Asynchronous cleanup, published under [`ASYNC_DISPOSE`].
pub trait AsyncDispose: Send + Sync {
    /// Release the resource. The returned future is awaited before the next
    /// record on the stack is disposed.
    fn dispose_async(&self) -> BoxFuture<'_, Result<(), BoxError>>;
}

/// A bare cleanup callable, not attached to any tagged value.
pub enum Callback {
    /// Runs to completion synchronously.
    Sync(Box<dyn FnOnce() -> Result<(), BoxError> + Send>),
    /// Returns a future that is awaited.
    Async(Box<dyn FnOnce() -> BoxFuture<'static, Result<(), BoxError>> + Send>),
}

impl Callback {
    /// Wrap a synchronous cleanup closure.
    pub fn from_fn<F>(f: F) -> Self
    where
        F: FnOnce() -> Result<(), BoxError> + Send + 'static,
    {
        Callback::Sync(Box::new(f))
    }

    /// Wrap an asynchronous cleanup closure.
    pub fn from_async<F, Fut>(f: F) -> Self
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), BoxError>> + Send + 'static,
    {
        Callback::Async(Box::new(move || f().boxed()))
    }

    /// Whether the callable is awaited.
    pub fn mode(&self) -> Mode {
        match self {
            Callback::Sync(_) => Mode::Sync,
            Callback::Async(_) => Mode::Async,
        }
    }
}

impl fmt::Debug for Callback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Callback")
            .field(&self.mode())
            .field(&"<function>")
            .finish()
    }
}

/// A value offered to a stack, before recognition.
///
/// Recognition turns a candidate into a record or fails with
/// [`InvalidResource`](crate::InvalidResource):
///
/// 1. `AsyncDispose` becomes an async record on an async stack. A sync stack
///    cannot await it and rejects it.
/// 2. `Dispose` becomes a sync record on either stack.
/// 3. `Callback` takes the flavor of the recognizing stack. A sync stack
///    rejects an async callback.
/// 4. `Inert` is always rejected.
pub enum Candidate {
    /// A value publishing cleanup under [`ASYNC_DISPOSE`].
    AsyncDispose(Arc<dyn AsyncDispose>),
    /// A value publishing cleanup under [`DISPOSE`].
    Dispose(Arc<dyn Dispose>),
    /// A bare cleanup callable.
    Callback(Callback),
    /// A value publishing nothing. The string describes it for error reports.
    Inert(String),
}

impl Candidate {
    /// Offer a synchronous resource.
    pub fn dispose<R: Dispose + 'static>(resource: Arc<R>) -> Self {
        Candidate::Dispose(resource)
    }

    /// Offer an asynchronous resource.
    pub fn async_dispose<R: AsyncDispose + 'static>(resource: Arc<R>) -> Self {
        Candidate::AsyncDispose(resource)
    }

    /// Offer a synchronous cleanup closure.
    pub fn from_fn<F>(f: F) -> Self
    where
        F: FnOnce() -> Result<(), BoxError> + Send + 'static,
    {
        Candidate::Callback(Callback::from_fn(f))
    }

    /// Offer an asynchronous cleanup closure.
    pub fn from_async<F, Fut>(f: F) -> Self
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), BoxError>> + Send + 'static,
    {
        Candidate::Callback(Callback::from_async(f))
    }

    /// Describe a value that has no cleanup.
    pub fn inert(description: impl Into<String>) -> Self {
        Candidate::Inert(description.into())
    }

    /// The tag this candidate publishes under, if any.
    pub fn capability(&self) -> Option<Capability> {
        match self {
            Candidate::AsyncDispose(_) => Some(ASYNC_DISPOSE),
            Candidate::Dispose(_) => Some(DISPOSE),
            Candidate::Callback(_) | Candidate::Inert(_) => None,
        }
    }
}

impl From<Callback> for Candidate {
    fn from(callback: Callback) -> Self {
        Candidate::Callback(callback)
    }
}

impl fmt::Debug for Candidate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Candidate::AsyncDispose(_) => f.write_str("Candidate::AsyncDispose(<resource>)"),
            Candidate::Dispose(_) => f.write_str("Candidate::Dispose(<resource>)"),
            Candidate::Callback(cb) => write!(f, "Candidate::{:?}", cb),
            Candidate::Inert(description) => write!(f, "Candidate::Inert({:?})", description),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Noop;

    impl Dispose for Noop {
        fn dispose(&self) -> Result<(), BoxError> {
            Ok(())
        }
    }

    impl AsyncDispose for Noop {
        fn dispose_async(&self) -> BoxFuture<'_, Result<(), BoxError>> {
            Box::pin(async { Ok(()) })
        }
    }

    #[test]
    fn tags_are_distinct_and_stable() {
        assert_ne!(DISPOSE, ASYNC_DISPOSE);
        assert_eq!(DISPOSE.key(), "disposable::dispose");
        assert_eq!(ASYNC_DISPOSE.key(), "disposable::async_dispose");
        assert_eq!(ASYNC_DISPOSE.to_string(), "disposable::async_dispose");
    }

    #[test]
    fn tags_map_to_modes() {
        assert_eq!(DISPOSE.mode(), Mode::Sync);
        assert_eq!(ASYNC_DISPOSE.mode(), Mode::Async);
    }

    #[test]
    fn candidate_reports_capability() {
        let noop = Arc::new(Noop);
        assert_eq!(Candidate::dispose(noop.clone()).capability(), Some(DISPOSE));
        assert_eq!(Candidate::async_dispose(noop).capability(), Some(ASYNC_DISPOSE));
        assert_eq!(Candidate::from_fn(|| Ok(())).capability(), None);
        assert_eq!(Candidate::inert("42").capability(), None);
    }

    #[test]
    fn callback_modes() {
        assert_eq!(Callback::from_fn(|| Ok(())).mode(), Mode::Sync);
        assert_eq!(Callback::from_async(|| async { Ok(()) }).mode(), Mode::Async);
    }

    #[test]
    fn candidate_debug_hides_functions() {
        let debug = format!("{:?}", Candidate::from_fn(|| Ok(())));
        assert!(debug.contains("<function>"));
        let debug = format!("{:?}", Candidate::inert("a number"));
        assert!(debug.contains("a number"));
    }
}
