//! Testing utilities for code that manages disposable resources.
//!
//! [`DisposalLog`] is a shared, ordered log. [`Probe`] is a resource that
//! writes its name to a log when disposed, through either capability, and
//! can be told to fail. Together they make ordering and at-most-once
//! properties easy to assert.
//!
//! # Example
//!
//! ```rust
//! use disposable::{assert_disposal_order, DisposableStack};
//! use disposable::testing::DisposalLog;
//!
//! let log = DisposalLog::new();
//! let stack = DisposableStack::new();
//! stack.use_resource(log.probe("outer")).unwrap();
//! stack.use_resource(log.probe("inner")).unwrap();
//! stack.dispose().unwrap();
//!
//! assert_disposal_order!(log, ["inner", "outer"]);
//! ```

use std::error::Error as StdError;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use futures::future::BoxFuture;

use crate::capability::{AsyncDispose, Dispose};
use crate::error::BoxError;

/// A shared, append-only log of disposal events.
///
/// Clones share the same underlying log.
#[derive(Debug, Clone, Default)]
pub struct DisposalLog {
    entries: Arc<Mutex<Vec<String>>>,
}

impl DisposalLog {
    /// Create an empty log.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an entry.
    pub fn push(&self, entry: impl Into<String>) {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(entry.into());
    }

    /// A snapshot of every entry so far, oldest first.
    pub fn entries(&self) -> Vec<String> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Number of entries so far.
    pub fn len(&self) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Returns true if nothing was logged.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// How many times `entry` was logged.
    pub fn count(&self, entry: &str) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|e| e.as_str() == entry)
            .count()
    }

    /// Yield to the tokio runtime until at least `len` entries are logged.
    ///
    /// Cleanups dropped inside a runtime run on a spawned task, so tests
    /// observe them only after yielding. Returns false if the log is still
    /// shorter after many yields.
    #[cfg(feature = "async")]
    pub async fn settle(&self, len: usize) -> bool {
        for _ in 0..1_000 {
            if self.len() >= len {
                return true;
            }
            tokio::task::yield_now().await;
        }
        self.len() >= len
    }

    /// A resource that logs `name` when disposed.
    pub fn probe(&self, name: impl Into<String>) -> Probe {
        Probe {
            name: name.into(),
            log: self.clone(),
            failure: None,
            disposals: AtomicUsize::new(0),
        }
    }

    /// A resource that logs `name` and then fails with `message`.
    pub fn failing_probe(&self, name: impl Into<String>, message: impl Into<String>) -> Probe {
        Probe {
            failure: Some(message.into()),
            ..self.probe(name)
        }
    }
}

/// A resource that records its own disposal.
///
/// Implements both [`Dispose`] and [`AsyncDispose`]. Each disposal logs the
/// probe's name, bumps a counter, and fails if the probe was built with
/// [`DisposalLog::failing_probe`].
#[derive(Debug)]
pub struct Probe {
    name: String,
    log: DisposalLog,
    failure: Option<String>,
    disposals: AtomicUsize,
}

impl Probe {
    /// The probe's name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// How many times this probe was disposed.
    pub fn disposals(&self) -> usize {
        self.disposals.load(Ordering::SeqCst)
    }

    fn record(&self) -> Result<(), BoxError> {
        self.disposals.fetch_add(1, Ordering::SeqCst);
        self.log.push(self.name.clone());
        match &self.failure {
            Some(message) => Err(Box::new(ProbeError {
                name: self.name.clone(),
                message: message.clone(),
            })),
            None => Ok(()),
        }
    }
}

impl Dispose for Probe {
    fn dispose(&self) -> Result<(), BoxError> {
        self.record()
    }
}

impl AsyncDispose for Probe {
    fn dispose_async(&self) -> BoxFuture<'_, Result<(), BoxError>> {
        Box::pin(async move { self.record() })
    }
}

/// The failure raised by a failing [`Probe`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeError {
    name: String,
    message: String,
}

impl ProbeError {
    /// Name of the probe that failed.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The configured failure message.
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl fmt::Display for ProbeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.name, self.message)
    }
}

impl StdError for ProbeError {}

/// Assert the exact sequence of entries in a [`DisposalLog`].
///
/// # Example
///
/// ```rust
/// use disposable::assert_disposal_order;
/// use disposable::testing::DisposalLog;
///
/// let log = DisposalLog::new();
/// log.push("b");
/// log.push("a");
/// assert_disposal_order!(log, ["b", "a"]);
/// ```
#[macro_export]
macro_rules! assert_disposal_order {
    ($log:expr, [$($name:expr),* $(,)?]) => {{
        let expected: ::std::vec::Vec<::std::string::String> =
            ::std::vec![$(::std::string::String::from($name)),*];
        let actual = $log.entries();
        assert_eq!(
            actual, expected,
            "disposal order mismatch: expected {:?}, got {:?}",
            expected, actual
        );
    }};
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn probe_logs_and_counts() {
        let log = DisposalLog::new();
        let probe = log.probe("p");
        probe.dispose().unwrap();
        probe.dispose().unwrap();
        assert_eq!(probe.disposals(), 2);
        assert_eq!(log.count("p"), 2);
        assert_eq!(log.len(), 2);
    }

    #[test]
    fn failing_probe_still_logs() {
        let log = DisposalLog::new();
        let err = log.failing_probe("f", "broken").dispose().unwrap_err();
        assert_eq!(err.to_string(), "f: broken");
        assert_eq!(log.entries(), vec!["f"]);
    }

    #[tokio::test]
    async fn async_dispose_uses_same_log() {
        let log = DisposalLog::new();
        let probe = log.probe("async");
        probe.dispose_async().await.unwrap();
        assert_eq!(log.entries(), vec!["async"]);
    }

    #[test]
    fn clones_share_entries() {
        let log = DisposalLog::new();
        let clone = log.clone();
        clone.push("shared");
        assert!(!log.is_empty());
        assert_disposal_order!(log, ["shared"]);
    }
}
