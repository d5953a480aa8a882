//! Aggregate disposal stacks.
//!
//! Both flavors share one engine:
//!
//! - an owned `Vec` of [`Record`]s in acquisition order
//! - a one-way `Pending -> Disposed` state flag
//! - an unwind that drains the stack in the same critical section that flips
//!   the flag, then runs every record most-recent first
//!
//! Because draining and flipping happen together, overlapping disposal calls
//! can never run a record twice: the second caller finds nothing to drain.
//!
//! Failures are collected, never allowed to stop the unwind, and shaped at the
//! end: one record tracked and one failure gives that failure back unchanged,
//! anything more gives an [`AggregateError`](crate::AggregateError).

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::error::{shape, AlreadyDisposed, Error};
use crate::record::{Mode, Record};

#[cfg(feature = "async")]
pub mod asynchronous;
pub mod sync;

#[cfg(feature = "async")]
pub use asynchronous::{AsyncAdder, AsyncDisposableStack};
pub use sync::{Adder, DisposableStack};

/// What a stack does when it is dropped while still pending.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DropPolicy {
    /// Dispose everything and log failures.
    #[default]
    Dispose,
    /// Discard the records without running them, logging a warning.
    Leak,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Pending,
    Disposed,
}

struct Inner {
    state: State,
    records: Vec<Record>,
}

/// The state shared by a stack and every adder handed out for it.
pub(crate) struct Shared {
    inner: Mutex<Inner>,
}

impl Shared {
    pub(crate) fn new(records: Vec<Record>) -> Arc<Self> {
        Arc::new(Shared {
            inner: Mutex::new(Inner {
                state: State::Pending,
                records,
            }),
        })
    }

    // A panicking hook never runs under this lock, so a poisoned guard still
    // holds consistent data.
    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Push a record, handing it back if the stack is already disposed.
    pub(crate) fn push(&self, record: Record) -> Result<(), Record> {
        let mut inner = self.lock();
        match inner.state {
            State::Pending => {
                inner.records.push(record);
                tracing::trace!(depth = inner.records.len(), "record pushed");
                Ok(())
            }
            State::Disposed => Err(record),
        }
    }

    /// Flip to `Disposed` and take every record, or `None` if already flipped.
    pub(crate) fn drain(&self) -> Option<Vec<Record>> {
        let mut inner = self.lock();
        match inner.state {
            State::Pending => {
                inner.state = State::Disposed;
                Some(std::mem::take(&mut inner.records))
            }
            State::Disposed => None,
        }
    }

    pub(crate) fn is_disposed(&self) -> bool {
        self.lock().state == State::Disposed
    }

    pub(crate) fn len(&self) -> usize {
        self.lock().records.len()
    }
}

impl fmt::Debug for Shared {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.lock();
        f.debug_struct("Shared")
            .field("state", &inner.state)
            .field("records", &inner.records.len())
            .finish()
    }
}

/// Failure collection for one unwind.
struct Unwind {
    tracked: usize,
    errors: Vec<Error>,
}

impl Unwind {
    fn start(tracked: usize) -> Self {
        tracing::debug!(tracked, "disposing stack");
        Unwind {
            tracked,
            errors: Vec::new(),
        }
    }

    fn record(&mut self, result: Result<(), crate::BoxError>) {
        if let Err(e) = result {
            self.errors.push(Error::Dispose(e));
        }
    }

    fn finish(self) -> Result<(), Error> {
        tracing::debug!(
            tracked = self.tracked,
            failed = self.errors.len(),
            "stack disposed"
        );
        shape(self.errors, self.tracked > 1)
    }
}

/// Run drained records most-recent first without awaiting.
pub(crate) fn unwind(records: Vec<Record>) -> Result<(), Error> {
    let mut unwind = Unwind::start(records.len());
    for record in records.into_iter().rev() {
        unwind.record(record.dispose_blocking());
    }
    unwind.finish()
}

/// Run drained records most-recent first, awaiting each before the next.
#[cfg(feature = "async")]
pub(crate) async fn unwind_async(records: Vec<Record>) -> Result<(), Error> {
    let mut unwind = Unwind::start(records.len());
    for record in records.into_iter().rev() {
        unwind.record(record.dispose().await);
    }
    unwind.finish()
}

/// Push `record`, or dispose it alone and fail if the stack already unwound.
pub(crate) fn track(shared: &Shared, record: Record) -> Result<(), Error> {
    shared.push(record).map_err(|rejected| {
        tracing::warn!("resource added to a disposed stack; disposing it immediately");
        let cause = dispose_detached(vec![rejected]).err();
        Error::AlreadyDisposed(AlreadyDisposed::new(cause))
    })
}

/// Dispose records from a context that cannot await.
///
/// Sync records run inline. Async records are handed to the tokio runtime
/// driving this thread, if there is one, and any failure is logged from the
/// spawned task. With no executor on the thread they are driven with a
/// blocking executor. Inside any other executor blocking could deadlock, so
/// they are leaked with a warning.
///
/// Only inline disposal reports failures to the caller.
pub(crate) fn dispose_detached(records: Vec<Record>) -> Result<(), Error> {
    if records.iter().all(|record| record.mode() == Mode::Sync) {
        return unwind(records);
    }
    let records = match spawn_on_runtime(records) {
        Ok(()) => return Ok(()),
        Err(records) => records,
    };
    match futures::executor::enter() {
        Ok(guard) => {
            drop(guard);
            unwind(records)
        }
        Err(_) => {
            tracing::warn!(
                leaked = records.len(),
                "cannot await cleanup inside a foreign executor; leaking resources"
            );
            Ok(())
        }
    }
}

#[cfg(feature = "async")]
fn spawn_on_runtime(records: Vec<Record>) -> Result<(), Vec<Record>> {
    let Ok(handle) = tokio::runtime::Handle::try_current() else {
        return Err(records);
    };
    tracing::debug!(tracked = records.len(), "handing cleanup to the current runtime");
    handle.spawn(async move {
        if let Err(error) = unwind_async(records).await {
            tracing::warn!(%error, "cleanup failed in a detached task");
        }
    });
    Ok(())
}

#[cfg(not(feature = "async"))]
fn spawn_on_runtime(records: Vec<Record>) -> Result<(), Vec<Record>> {
    Err(records)
}

/// Shared `Drop` behavior for both flavors.
pub(crate) fn drop_pending(shared: &Shared, policy: DropPolicy) {
    let Some(records) = shared.drain() else {
        return;
    };
    match policy {
        DropPolicy::Dispose => {
            if let Err(error) = dispose_detached(records) {
                tracing::warn!(%error, "cleanup failed while dropping a pending stack");
            }
        }
        DropPolicy::Leak => {
            if !records.is_empty() {
                tracing::warn!(leaked = records.len(), "pending stack dropped without cleanup");
            }
        }
    }
}

/// Merge rollback failures into the failures that caused the rollback.
pub(crate) fn rollback_error(mut failures: Vec<Error>, disposal: Result<(), Error>) -> Error {
    if let Err(error) = disposal {
        failures.extend(error.unpack());
    }
    crate::error::combine(failures)
}
