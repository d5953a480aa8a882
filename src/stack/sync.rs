//! The synchronous disposal stack.

use std::convert::Infallible;
use std::fmt;
use std::sync::Arc;

use super::{drop_pending, rollback_error, track, unwind, DropPolicy, Shared};
use crate::capability::{Callback, Candidate, Dispose};
use crate::error::{AlreadyDisposed, BoxError, Error};
use crate::record::{Mode, Record};

// ============================================================================
// Adder
// ============================================================================

/// A detachable handle for adding to a [`DisposableStack`].
///
/// Every clone mutates the same stack. Adding after the stack was disposed
/// disposes the new value on the spot and returns
/// [`Error::AlreadyDisposed`].
#[derive(Clone)]
pub struct Adder {
    shared: Arc<Shared>,
}

impl Adder {
    /// Recognize `value` and push it.
    ///
    /// The candidate is consumed. Use [`use_resource`](Self::use_resource)
    /// or [`adopt`](Self::adopt) to get the tracked value back.
    pub fn add(&self, value: impl Into<Candidate>) -> Result<(), Error> {
        let record = Record::recognize(value.into(), Mode::Sync)?;
        track(&self.shared, record)
    }

    /// Track a resource and hand it back behind an `Arc`.
    pub fn use_resource<R: Dispose + 'static>(&self, resource: R) -> Result<Arc<R>, Error> {
        let resource = Arc::new(resource);
        self.add(Candidate::dispose(resource.clone()))?;
        Ok(resource)
    }

    /// Track a value with a caller-supplied cleanup.
    ///
    /// `value` does not need to implement anything. `on_dispose` receives it
    /// when the stack unwinds.
    pub fn adopt<V, F>(&self, value: V, on_dispose: F) -> Result<Arc<V>, Error>
    where
        V: Send + Sync + 'static,
        F: FnOnce(&V) -> Result<(), BoxError> + Send + 'static,
    {
        let value = Arc::new(value);
        track(&self.shared, Record::adopt(value.clone(), on_dispose))?;
        Ok(value)
    }

    /// Track a bare cleanup callback.
    pub fn defer<F>(&self, on_dispose: F) -> Result<(), Error>
    where
        F: FnOnce() -> Result<(), BoxError> + Send + 'static,
    {
        self.add(Callback::from_fn(on_dispose))
    }

    /// Returns true once the owning stack has been disposed.
    pub fn is_disposed(&self) -> bool {
        self.shared.is_disposed()
    }
}

impl fmt::Debug for Adder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Adder").field("stack", &self.shared).finish()
    }
}

// ============================================================================
// DisposableStack
// ============================================================================

/// An ordered stack of synchronous cleanups.
///
/// Resources are disposed in reverse order of addition, exactly once, with
/// every failure collected.
///
/// # Example
///
/// ```rust
/// use disposable::DisposableStack;
/// use std::sync::{Arc, Mutex};
///
/// let log = Arc::new(Mutex::new(Vec::new()));
/// let stack = DisposableStack::new();
/// for name in ["db", "cache", "socket"] {
///     let log = log.clone();
///     stack
///         .defer(move || {
///             log.lock().unwrap().push(name);
///             Ok(())
///         })
///         .unwrap();
/// }
///
/// stack.dispose().unwrap();
/// assert_eq!(*log.lock().unwrap(), vec!["socket", "cache", "db"]);
/// ```
pub struct DisposableStack {
    adder: Adder,
    drop_policy: DropPolicy,
}

impl DisposableStack {
    /// Create an empty stack.
    pub fn new() -> Self {
        Self::from_records(Vec::new())
    }

    /// Create a stack seeded with a single cleanup callback.
    pub fn with_callback<F>(on_dispose: F) -> Self
    where
        F: FnOnce() -> Result<(), BoxError> + Send + 'static,
    {
        Self::from_records(vec![Record::Sync(Box::new(on_dispose))])
    }

    pub(crate) fn from_records(records: Vec<Record>) -> Self {
        DisposableStack {
            adder: Adder {
                shared: Shared::new(records),
            },
            drop_policy: DropPolicy::default(),
        }
    }

    /// Choose what happens if the stack is dropped while still pending.
    pub fn on_drop(mut self, policy: DropPolicy) -> Self {
        self.drop_policy = policy;
        self
    }

    /// Recognize `value` and push it.
    ///
    /// The candidate is consumed. Use [`use_resource`](Self::use_resource)
    /// or [`adopt`](Self::adopt) to get the tracked value back.
    pub fn add(&self, value: impl Into<Candidate>) -> Result<(), Error> {
        self.adder.add(value)
    }

    /// Track a resource and hand it back behind an `Arc`.
    pub fn use_resource<R: Dispose + 'static>(&self, resource: R) -> Result<Arc<R>, Error> {
        self.adder.use_resource(resource)
    }

    /// Track a value with a caller-supplied cleanup.
    pub fn adopt<V, F>(&self, value: V, on_dispose: F) -> Result<Arc<V>, Error>
    where
        V: Send + Sync + 'static,
        F: FnOnce(&V) -> Result<(), BoxError> + Send + 'static,
    {
        self.adder.adopt(value, on_dispose)
    }

    /// Track a bare cleanup callback.
    pub fn defer<F>(&self, on_dispose: F) -> Result<(), Error>
    where
        F: FnOnce() -> Result<(), BoxError> + Send + 'static,
    {
        self.adder.defer(on_dispose)
    }

    /// A detachable handle that adds to this stack.
    pub fn adder(&self) -> Adder {
        self.adder.clone()
    }

    /// Dispose every tracked resource, most recent first.
    ///
    /// Does nothing if the stack was already disposed.
    pub fn dispose(&self) -> Result<(), Error> {
        match self.adder.shared.drain() {
            Some(records) => unwind(records),
            None => Ok(()),
        }
    }

    /// Move every pending record into a new stack.
    ///
    /// This stack becomes disposed without running anything, so ownership of
    /// the cleanups can leave a scope that would otherwise unwind them.
    pub fn move_out(&self) -> Result<DisposableStack, Error> {
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
    pub fn from_candidates<I, C>(items: I) -> Result<Self, Error>
    where
        I: IntoIterator<Item = C>,
        C: Into<Candidate>,
    {
        Self::from_resources(items, Into::into)
    }

    /// Build a stack from `items`, mapping each one to a candidate.
    ///
    /// Recognition failures do not stop the iteration. If any occurred,
    /// everything added so far is disposed and the failures, merged with any
    /// rollback failures, are returned. The half-built stack is never handed
    /// out.
    pub fn from_resources<I, T, F>(items: I, map: F) -> Result<Self, Error>
    where
        I: IntoIterator<Item = T>,
        F: FnMut(T) -> Candidate,
    {
        Self::try_from_resources(items.into_iter().map(Ok::<T, Infallible>), map)
    }

    /// Like [`from_resources`](Self::from_resources) for a fallible source.
    ///
    /// A source error ends the iteration and triggers the same rollback.
    pub fn try_from_resources<I, T, E, F>(items: I, mut map: F) -> Result<Self, Error>
    where
        I: IntoIterator<Item = Result<T, E>>,
        E: Into<BoxError>,
        F: FnMut(T) -> Candidate,
    {
        let stack = Self::new();
        let mut failures = Vec::new();

        for item in items {
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
        Err(rollback_error(failures, stack.dispose()))
    }
}

impl Default for DisposableStack {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for DisposableStack {
    fn drop(&mut self) {
        drop_pending(&self.adder.shared, self.drop_policy);
    }
}

impl fmt::Debug for DisposableStack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DisposableStack")
            .field("stack", &self.adder.shared)
            .field("drop_policy", &self.drop_policy)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::DisposalLog;

    #[test]
    fn disposes_in_reverse_order() {
        let log = DisposalLog::new();
        let stack = DisposableStack::new();
        stack.use_resource(log.probe("r1")).unwrap();
        stack.use_resource(log.probe("r2")).unwrap();
        stack.use_resource(log.probe("r3")).unwrap();

        stack.dispose().unwrap();
        assert_eq!(log.entries(), vec!["r3", "r2", "r1"]);
    }

    #[test]
    fn dispose_twice_runs_each_cleanup_once() {
        let log = DisposalLog::new();
        let stack = DisposableStack::new();
        let probe = stack.use_resource(log.probe("once")).unwrap();

        stack.dispose().unwrap();
        stack.dispose().unwrap();
        drop(stack);
        assert_eq!(probe.disposals(), 1);
    }

    #[test]
    fn single_failure_is_returned_unwrapped() {
        let log = DisposalLog::new();
        let stack = DisposableStack::new();
        stack.use_resource(log.failing_probe("only", "close failed")).unwrap();

        let err = stack.dispose().unwrap_err();
        let probe_err = err
            .downcast_ref::<crate::testing::ProbeError>()
            .expect("hook error kept as-is");
        assert_eq!(probe_err.name(), "only");
    }

    #[test]
    fn single_failure_among_many_records_is_aggregated() {
        let log = DisposalLog::new();
        let stack = DisposableStack::new();
        stack.use_resource(log.probe("fine")).unwrap();
        stack.use_resource(log.failing_probe("bad", "nope")).unwrap();

        let err = stack.dispose().unwrap_err();
        let aggregate = err.as_aggregate().expect("aggregate");
        assert_eq!(aggregate.len(), 1);
        assert_eq!(log.entries(), vec!["bad", "fine"]);
    }

    #[test]
    fn failures_are_collected_in_disposal_order() {
        let log = DisposalLog::new();
        let stack = DisposableStack::new();
        stack.use_resource(log.failing_probe("first", "e1")).unwrap();
        stack.use_resource(log.probe("middle")).unwrap();
        stack.use_resource(log.failing_probe("last", "e3")).unwrap();

        let err = stack.dispose().unwrap_err();
        let messages: Vec<String> = err
            .as_aggregate()
            .expect("aggregate")
            .errors()
            .iter()
            .map(|e| e.to_string())
            .collect();
        assert_eq!(messages, vec!["last: e3", "first: e1"]);
        assert_eq!(log.entries(), vec!["last", "middle", "first"]);
    }

    #[test]
    fn adopt_passes_value_to_cleanup() {
        let log = DisposalLog::new();
        let stack = DisposableStack::new();
        let sink = log.clone();
        let handle = stack
            .adopt(String::from("raw-fd-7"), move |fd: &String| {
                sink.push(format!("closed {}", fd));
                Ok(())
            })
            .unwrap();
        assert_eq!(handle.as_str(), "raw-fd-7");

        stack.dispose().unwrap();
        assert_eq!(log.entries(), vec!["closed raw-fd-7"]);
    }

    #[test]
    fn adder_after_dispose_rolls_back_and_fails() {
        let log = DisposalLog::new();
        let stack = DisposableStack::new();
        let adder = stack.adder();
        stack.dispose().unwrap();

        let err = adder.use_resource(log.probe("late")).unwrap_err();
        assert!(err.is_already_disposed());
        assert_eq!(log.entries(), vec!["late"]);
    }

    #[test]
    fn already_disposed_keeps_rollback_failure_as_cause() {
        let log = DisposalLog::new();
        let stack = DisposableStack::new();
        stack.dispose().unwrap();

        let err = stack
            .use_resource(log.failing_probe("late", "cannot close"))
            .unwrap_err();
        match err {
            Error::AlreadyDisposed(inner) => {
                let cause = inner.cause().expect("rollback failure");
                assert!(cause.to_string().contains("cannot close"));
            }
            other => panic!("expected AlreadyDisposed, got {:?}", other),
        }
    }

    #[test]
    fn invalid_candidates_fail_at_add() {
        let stack = DisposableStack::new();
        let err = stack.add(Candidate::inert("an integer")).unwrap_err();
        assert!(err.is_invalid_resource());
        assert!(stack.is_empty());
    }

    #[test]
    fn async_candidates_are_invalid_on_sync_stack() {
        let stack = DisposableStack::new();
        let err = stack
            .add(Candidate::from_async(|| async { Ok(()) }))
            .unwrap_err();
        assert!(err.is_invalid_resource());
    }

    #[test]
    fn with_callback_seeds_stack() {
        let log = DisposalLog::new();
        let sink = log.clone();
        let stack = DisposableStack::with_callback(move || {
            sink.push("seed");
            Ok(())
        });
        assert_eq!(stack.len(), 1);
        stack.dispose().unwrap();
        assert_eq!(log.entries(), vec!["seed"]);
    }

    #[test]
    fn move_out_transfers_ownership() {
        let log = DisposalLog::new();
        let stack = DisposableStack::new();
        stack.use_resource(log.probe("a")).unwrap();
        stack.use_resource(log.probe("b")).unwrap();

        let moved = stack.move_out().unwrap();
        assert!(stack.is_disposed());
        assert!(stack.move_out().unwrap_err().is_already_disposed());
        assert!(log.entries().is_empty());

        moved.dispose().unwrap();
        assert_eq!(log.entries(), vec!["b", "a"]);
    }

    #[test]
    fn drop_disposes_pending_stack() {
        let log = DisposalLog::new();
        {
            let stack = DisposableStack::new();
            stack.use_resource(log.probe("dropped")).unwrap();
        }
        assert_eq!(log.entries(), vec!["dropped"]);
    }

    #[test]
    fn leak_policy_skips_cleanup() {
        let log = DisposalLog::new();
        {
            let stack = DisposableStack::new().on_drop(DropPolicy::Leak);
            stack.use_resource(log.probe("kept")).unwrap();
        }
        assert!(log.entries().is_empty());
    }

    #[test]
    fn cleanup_adding_to_its_own_stack_is_rejected() {
        let log = DisposalLog::new();
        let stack = DisposableStack::new();
        let adder = stack.adder();
        let sink = log.clone();
        let outcome = Arc::new(std::sync::Mutex::new(None));
        let outcome_clone = outcome.clone();
        stack
            .defer(move || {
                let result = adder.defer(move || {
                    sink.push("re-entrant");
                    Ok(())
                });
                *outcome_clone.lock().unwrap() = Some(result.is_err());
                Ok(())
            })
            .unwrap();

        stack.dispose().unwrap();
        assert_eq!(*outcome.lock().unwrap(), Some(true));
        assert_eq!(log.entries(), vec!["re-entrant"]);
    }

    #[test]
    fn from_resources_builds_pending_stack() {
        let log = DisposalLog::new();
        let names = vec!["a", "b", "c"];
        let stack = DisposableStack::from_resources(names, |name| {
            Candidate::dispose(Arc::new(log.probe(name)))
        })
        .unwrap();
        assert_eq!(stack.len(), 3);
        assert!(log.entries().is_empty());

        stack.dispose().unwrap();
        assert_eq!(log.entries(), vec!["c", "b", "a"]);
    }

    #[test]
    fn from_resources_rolls_back_on_invalid_item() {
        let log = DisposalLog::new();
        let items = vec![Some("r1"), Some("r2"), None];
        let err = DisposableStack::from_resources(items, |item| match item {
            Some(name) => Candidate::dispose(Arc::new(log.probe(name))),
            None => Candidate::inert("missing resource"),
        })
        .unwrap_err();

        assert!(err.is_invalid_resource());
        assert_eq!(log.entries(), vec!["r2", "r1"]);
    }

    #[test]
    fn from_resources_keeps_iterating_after_invalid_item() {
        let log = DisposalLog::new();
        let items = vec![None, Some("after")];
        let err = DisposableStack::from_resources(items, |item| match item {
            Some(name) => Candidate::dispose(Arc::new(log.probe(name))),
            None => Candidate::inert("missing resource"),
        })
        .unwrap_err();

        assert!(err.is_invalid_resource());
        assert_eq!(log.entries(), vec!["after"]);
    }

    #[test]
    fn try_from_resources_stops_at_source_error() {
        let log = DisposalLog::new();
        let items: Vec<Result<&str, std::io::Error>> = vec![
            Ok("opened"),
            Err(std::io::Error::other("listing failed")),
            Ok("never"),
        ];
        let err = DisposableStack::try_from_resources(items, |name| {
            Candidate::dispose(Arc::new(log.probe(name)))
        })
        .unwrap_err();

        assert!(matches!(err, Error::Source(_)));
        assert_eq!(log.entries(), vec!["opened"]);
    }

    #[test]
    fn from_resources_merges_rollback_failures() {
        let log = DisposalLog::new();
        let items = vec![Some("bad"), None];
        let err = DisposableStack::from_resources(items, |item| match item {
            Some(name) => Candidate::dispose(Arc::new(log.failing_probe(name, "close"))),
            None => Candidate::inert("missing resource"),
        })
        .unwrap_err();

        let aggregate = err.as_aggregate().expect("aggregate");
        assert_eq!(aggregate.len(), 2);
        assert!(aggregate.errors()[0].is_invalid_resource());
        assert!(matches!(aggregate.errors()[1], Error::Dispose(_)));
    }
}
