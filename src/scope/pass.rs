//! The synchronous per-pass adapter.

use std::fmt;
use std::iter::FusedIterator;
use std::sync::Arc;

use super::PassState;
use crate::capability::Dispose;
use crate::error::{BoxError, Error, ScopeError};
use crate::record::Record;
use crate::stack::{Adder, DisposableStack};

/// A single-yield iterator over a fresh [`DisposableStack`].
///
/// The first call to `next` yields the item. The second disposes the stack
/// and ends the iteration, surfacing any cleanup failure as `Some(Err(_))`.
/// Dropping an unfinished pass still disposes the stack, but can only log
/// failures. Prefer [`DisposableStack::scope`] when the errors matter.
///
/// # Example
///
/// ```rust
/// use disposable::DisposableStack;
///
/// for adder in DisposableStack::pass() {
///     let adder = adder.unwrap();
///     adder.defer(|| Ok(())).unwrap();
/// }
/// ```
pub struct Pass<Y> {
    stack: DisposableStack,
    item: Y,
    state: PassState,
}

impl<Y: Clone> Pass<Y> {
    pub(crate) fn new(stack: DisposableStack, item: Y) -> Self {
        Pass {
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
    pub fn advance(&mut self) -> Result<Option<Y>, Error> {
        match self.state {
            PassState::NotYielded => Ok(Some(self.enter())),
            PassState::Yielded => self.finish().map(|()| None),
            PassState::Closed => Ok(None),
        }
    }
}

impl<Y> Pass<Y> {
    /// Close the pass early, disposing the stack.
    ///
    /// Closing an already closed pass does nothing.
    pub fn close(&mut self) -> Result<(), Error> {
        match self.state {
            PassState::Closed => Ok(()),
            _ => self.finish(),
        }
    }

    /// Close the pass because the body failed with `error`.
    ///
    /// The stack is disposed and `error` is returned as the primary failure.
    /// A cleanup failure never replaces it and is kept as `suppressed`.
    pub fn close_with_error<E>(&mut self, error: E) -> ScopeError<E> {
        let suppressed = match self.state {
            PassState::Closed => None,
            _ => self.finish().err(),
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
    pub fn stack(&self) -> &DisposableStack {
        &self.stack
    }

    fn finish(&mut self) -> Result<(), Error> {
        self.state = PassState::Closed;
        self.stack.dispose()
    }
}

impl<Y: Clone> Iterator for Pass<Y> {
    type Item = Result<Y, Error>;

    fn next(&mut self) -> Option<Self::Item> {
        self.advance().transpose()
    }
}

impl<Y: Clone> FusedIterator for Pass<Y> {}

impl<Y> Drop for Pass<Y> {
    fn drop(&mut self) {
        if self.state == PassState::Closed {
            return;
        }
        if let Err(error) = self.finish() {
            if std::thread::panicking() {
                tracing::error!(%error, "cleanup failed while unwinding from a panic");
            } else {
                tracing::warn!(%error, "cleanup failed while dropping an unfinished pass");
            }
        }
    }
}

impl<Y: fmt::Debug> fmt::Debug for Pass<Y> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pass")
            .field("state", &self.state)
            .field("item", &self.item)
            .field("stack", &self.stack)
            .finish()
    }
}

impl DisposableStack {
    /// A pass over a fresh stack that yields its [`Adder`].
    pub fn pass() -> Pass<Adder> {
        let stack = DisposableStack::new();
        let adder = stack.adder();
        Pass::new(stack, adder)
    }

    /// A pass that yields `resource` itself and disposes it on close.
    pub fn using<R: Dispose + 'static>(resource: R) -> Pass<Arc<R>> {
        let resource = Arc::new(resource);
        let record = Record::adopt(resource.clone(), |r: &R| r.dispose());
        Pass::new(DisposableStack::from_records(vec![record]), resource)
    }

    /// A pass that yields `value` and runs `on_dispose` against it on close.
    pub fn using_with<V, F>(value: V, on_dispose: F) -> Pass<Arc<V>>
    where
        V: Send + Sync + 'static,
        F: FnOnce(&V) -> Result<(), BoxError> + Send + 'static,
    {
        let value = Arc::new(value);
        let record = Record::adopt(value.clone(), on_dispose);
        Pass::new(DisposableStack::from_records(vec![record]), value)
    }

    /// Run `body` with an adder for a fresh stack, then dispose the stack.
    ///
    /// Cleanup runs on success, on error, and on panic. On error the body's
    /// error wins and any cleanup failure is kept as `suppressed`.
    ///
    /// # Example
    ///
    /// ```rust
    /// use disposable::{DisposableStack, ScopeError};
    ///
    /// let result: Result<u32, ScopeError<&str>> = DisposableStack::scope(|adder| {
    ///     adder.defer(|| Err("socket already closed".into())).unwrap();
    ///     Err("request failed")
    /// });
    ///
    /// let err = result.unwrap_err();
    /// assert_eq!(err.body_error(), Some(&"request failed"));
    /// assert!(err.suppressed().is_some());
    /// ```
    pub fn scope<T, E, F>(body: F) -> Result<T, ScopeError<E>>
    where
        F: FnOnce(&Adder) -> Result<T, E>,
    {
        run_scope(Self::pass(), body)
    }

    /// Run `body` against a single resource, then dispose it.
    pub fn using_scope<R, T, E, F>(resource: R, body: F) -> Result<T, ScopeError<E>>
    where
        R: Dispose + 'static,
        F: FnOnce(&R) -> Result<T, E>,
    {
        run_scope(Self::using(resource), |resource| body(&**resource))
    }
}

fn run_scope<Y, T, E, F>(mut pass: Pass<Y>, body: F) -> Result<T, ScopeError<E>>
where
    Y: Clone,
    F: FnOnce(&Y) -> Result<T, E>,
{
    let item = pass.enter();
    match body(&item) {
        Ok(value) => match pass.close() {
            Ok(()) => Ok(value),
            Err(e) => Err(ScopeError::Dispose(e)),
        },
        Err(error) => Err(pass.close_with_error(error)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::DisposalLog;
    use tracing_test::traced_test;

    #[test]
    fn yields_once_then_disposes() {
        let log = DisposalLog::new();
        let mut pass = DisposableStack::pass();
        assert_eq!(pass.state(), PassState::NotYielded);

        let adder = pass.next().unwrap().unwrap();
        adder.use_resource(log.probe("r1")).unwrap();
        adder.use_resource(log.probe("r2")).unwrap();
        assert_eq!(pass.state(), PassState::Yielded);
        assert!(log.entries().is_empty());

        assert!(pass.next().is_none());
        assert!(pass.is_closed());
        assert_eq!(log.entries(), vec!["r2", "r1"]);
        assert!(pass.next().is_none());
    }

    #[test]
    fn for_loop_disposes_at_end_of_body() {
        let log = DisposalLog::new();
        let mut passes = 0;
        for adder in DisposableStack::pass() {
            let adder = adder.unwrap();
            adder.use_resource(log.probe("inside")).unwrap();
            passes += 1;
        }
        assert_eq!(passes, 1);
        assert_eq!(log.entries(), vec!["inside"]);
    }

    #[test]
    #[allow(clippy::never_loop)]
    fn break_disposes_through_drop() {
        let log = DisposalLog::new();
        for adder in DisposableStack::pass() {
            adder.unwrap().use_resource(log.probe("early")).unwrap();
            break;
        }
        assert_eq!(log.entries(), vec!["early"]);
    }

    #[test]
    fn close_before_advancing_disposes_stack() {
        let mut pass = DisposableStack::pass();
        pass.close().unwrap();
        assert!(pass.is_closed());
        assert!(pass.stack().is_disposed());
        assert!(pass.next().is_none());
        pass.close().unwrap();
    }

    #[test]
    fn advance_surfaces_cleanup_failure() {
        let log = DisposalLog::new();
        let mut pass = DisposableStack::pass();
        let adder = pass.next().unwrap().unwrap();
        adder.use_resource(log.failing_probe("bad", "boom")).unwrap();

        let err = pass.next().unwrap().unwrap_err();
        assert_eq!(err.to_string(), "bad: boom");
        assert!(pass.next().is_none());
    }

    #[test]
    fn close_with_error_keeps_body_error_first() {
        let log = DisposalLog::new();
        let mut pass = DisposableStack::pass();
        let adder = pass.next().unwrap().unwrap();
        adder.use_resource(log.failing_probe("bad", "close failed")).unwrap();

        let err = pass.close_with_error("body failed");
        assert_eq!(err.body_error(), Some(&"body failed"));
        assert_eq!(
            err.suppressed().map(|e| e.to_string()),
            Some("bad: close failed".to_string())
        );
        assert!(pass.is_closed());
    }

    #[test]
    fn retained_adder_fails_after_close() {
        let log = DisposalLog::new();
        let mut pass = DisposableStack::pass();
        let adder = pass.next().unwrap().unwrap();
        assert!(pass.next().is_none());

        let err = adder.use_resource(log.probe("too late")).unwrap_err();
        assert!(err.is_already_disposed());
        assert_eq!(log.entries(), vec!["too late"]);
    }

    #[test]
    fn using_yields_resource_itself() {
        let log = DisposalLog::new();
        let mut pass = DisposableStack::using(log.probe("file"));
        let file = pass.next().unwrap().unwrap();
        assert_eq!(file.name(), "file");
        assert!(pass.next().is_none());
        assert_eq!(file.disposals(), 1);
    }

    #[test]
    fn using_with_passes_value_to_cleanup() {
        let log = DisposalLog::new();
        let sink = log.clone();
        let mut pass = DisposableStack::using_with(7_u32, move |fd: &u32| {
            sink.push(format!("close({})", fd));
            Ok(())
        });
        assert_eq!(*pass.next().unwrap().unwrap(), 7);
        assert!(pass.next().is_none());
        assert_eq!(log.entries(), vec!["close(7)"]);
    }

    #[test]
    fn scope_returns_value_after_cleanup() {
        let log = DisposalLog::new();
        let result: Result<&str, ScopeError<()>> = DisposableStack::scope(|adder| {
            adder.use_resource(log.probe("conn")).map_err(|_| ())?;
            Ok("done")
        });
        assert_eq!(result.unwrap(), "done");
        assert_eq!(log.entries(), vec!["conn"]);
    }

    #[test]
    fn scope_reports_cleanup_failure_without_body_error() {
        let log = DisposalLog::new();
        let result: Result<(), ScopeError<()>> = DisposableStack::scope(|adder| {
            adder
                .use_resource(log.failing_probe("conn", "reset"))
                .map_err(|_| ())?;
            Ok(())
        });
        let err = result.unwrap_err();
        assert!(err.body_error().is_none());
        assert!(err.dispose_error().is_some());
    }

    #[test]
    fn scope_disposes_on_panic() {
        let log = DisposalLog::new();
        let probe_log = log.clone();
        let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _: Result<(), ScopeError<()>> = DisposableStack::scope(|adder| {
                adder.use_resource(probe_log.probe("guarded")).unwrap();
                panic!("body panicked");
            });
        }));
        assert!(outcome.is_err());
        assert_eq!(log.entries(), vec!["guarded"]);
    }

    #[test]
    fn using_scope_hands_out_resource() {
        let log = DisposalLog::new();
        let name = DisposableStack::using_scope(log.probe("lock"), |lock| {
            Ok::<_, ()>(lock.name().to_string())
        })
        .unwrap();
        assert_eq!(name, "lock");
        assert_eq!(log.entries(), vec!["lock"]);
    }

    #[test]
    #[traced_test]
    fn dropped_pass_logs_cleanup_failure() {
        let log = DisposalLog::new();
        {
            let mut pass = DisposableStack::pass();
            let adder = pass.next().unwrap().unwrap();
            adder.use_resource(log.failing_probe("leaky", "refused")).unwrap();
        }
        assert!(logs_contain("cleanup failed while dropping an unfinished pass"));
        assert!(logs_contain("refused"));
    }

    #[test]
    #[traced_test]
    fn panic_with_failing_cleanup_logs_error() {
        let log = DisposalLog::new();
        let probe_log = log.clone();
        let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let mut pass = DisposableStack::pass();
            let adder = pass.next().unwrap().unwrap();
            adder
                .use_resource(probe_log.failing_probe("unwinding", "stuck"))
                .unwrap();
            panic!("body panicked");
        }));
        assert!(outcome.is_err());
        assert!(logs_contain("cleanup failed while unwinding from a panic"));
        assert_eq!(log.entries(), vec!["unwinding"]);
    }
}
