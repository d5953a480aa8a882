//! Normalized resource records.
//!
//! A [`Record`] is what a stack actually keeps: the cleanup callable with its
//! receiver already bound, tagged with the mode it runs in. Recognition
//! happens once when the record is built and is never repeated.

use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use futures::future::{BoxFuture, FutureExt};

use crate::capability::{Callback, Candidate};
use crate::error::{BoxError, HookPanicked, InvalidResource};

/// Whether cleanup is awaited.
///
/// Also names the flavor of a stack: a sync stack only holds sync records,
/// an async stack holds both.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Mode {
    /// Runs to completion when invoked.
    Sync,
    /// Returns a future that must be awaited.
    Async,
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Mode::Sync => f.write_str("sync"),
            Mode::Async => f.write_str("async"),
        }
    }
}

pub(crate) type SyncHook = Box<dyn FnOnce() -> Result<(), BoxError> + Send>;
pub(crate) type AsyncHook = Box<dyn FnOnce() -> BoxFuture<'static, Result<(), BoxError>> + Send>;

/// One tracked cleanup, receiver already bound.
pub enum Record {
    /// Invoked and finished before the next record is popped.
    Sync(SyncHook),
    /// Invoked and awaited before the next record is popped.
    Async(AsyncHook),
}

impl Record {
    /// Recognize a candidate for a stack of the given flavor.
    pub fn recognize(candidate: Candidate, flavor: Mode) -> Result<Self, InvalidResource> {
        match candidate {
            Candidate::AsyncDispose(resource) => match flavor {
                Mode::Async => Ok(Record::Async(Box::new(move || {
                    async move { resource.dispose_async().await }.boxed()
                }))),
                Mode::Sync => Err(InvalidResource::new(
                    "a value publishing only asynchronous cleanup",
                    flavor,
                )),
            },
            Candidate::Dispose(resource) => Ok(Record::Sync(Box::new(move || resource.dispose()))),
            Candidate::Callback(Callback::Sync(f)) => match flavor {
                Mode::Sync => Ok(Record::Sync(f)),
                Mode::Async => Ok(Record::Async(Box::new(move || {
                    futures::future::ready(f()).boxed()
                }))),
            },
            Candidate::Callback(Callback::Async(f)) => match flavor {
                Mode::Async => Ok(Record::Async(f)),
                Mode::Sync => Err(InvalidResource::new("an asynchronous callback", flavor)),
            },
            Candidate::Inert(description) => Err(InvalidResource::new(description, flavor)),
        }
    }

    /// Bind a caller-supplied synchronous cleanup to `value`.
    ///
    /// The value itself is never inspected.
    pub fn adopt<V, F>(value: Arc<V>, on_dispose: F) -> Self
    where
        V: Send + Sync + 'static,
        F: FnOnce(&V) -> Result<(), BoxError> + Send + 'static,
    {
        Record::Sync(Box::new(move || on_dispose(&value)))
    }

    /// Bind a caller-supplied asynchronous cleanup to `value`.
    pub fn adopt_async<V, F, Fut>(value: Arc<V>, on_dispose: F) -> Self
    where
        V: Send + Sync + 'static,
        F: FnOnce(Arc<V>) -> Fut + Send + 'static,
        Fut: std::future::Future<Output = Result<(), BoxError>> + Send + 'static,
    {
        Record::Async(Box::new(move || on_dispose(value).boxed()))
    }

    /// The mode this record runs in.
    pub fn mode(&self) -> Mode {
        match self {
            Record::Sync(_) => Mode::Sync,
            Record::Async(_) => Mode::Async,
        }
    }

    /// Run the cleanup, awaiting it if it is asynchronous.
    ///
    /// A panicking hook is reported as [`HookPanicked`] instead of unwinding
    /// through the stack.
    pub(crate) async fn dispose(self) -> Result<(), BoxError> {
        match self {
            Record::Sync(hook) => run_sync(hook),
            Record::Async(hook) => {
                let future = match panic::catch_unwind(AssertUnwindSafe(hook)) {
                    Ok(future) => future,
                    Err(payload) => return Err(HookPanicked::from_payload(payload).into()),
                };
                match AssertUnwindSafe(future).catch_unwind().await {
                    Ok(result) => result,
                    Err(payload) => Err(HookPanicked::from_payload(payload).into()),
                }
            }
        }
    }

    /// Run the cleanup without an executor.
    ///
    /// Async records are driven with `futures::executor::block_on`, so this
    /// must only see an async record when no executor is running on the
    /// current thread. `stack::dispose_detached` checks that before calling.
    pub(crate) fn dispose_blocking(self) -> Result<(), BoxError> {
        match self {
            Record::Sync(hook) => run_sync(hook),
            record @ Record::Async(_) => futures::executor::block_on(record.dispose()),
        }
    }
}

fn run_sync(hook: SyncHook) -> Result<(), BoxError> {
    match panic::catch_unwind(AssertUnwindSafe(hook)) {
        Ok(result) => result,
        Err(payload) => Err(HookPanicked::from_payload(payload).into()),
    }
}

impl fmt::Debug for Record {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Record")
            .field("mode", &self.mode())
            .field("dispose", &"<function>")
            .finish()
    }
}
