//! Error types for disposal stacks.
//!
//! Every failure a stack can observe ends up in one of these types:
//!
//! - [`InvalidResource`] - a value could not be recognized as a resource
//! - [`AlreadyDisposed`] - a value was offered to a stack that already unwound
//! - [`AggregateError`] - several failures collected during one unwind
//! - [`ScopeError`] - the outcome of a scope whose body and cleanup can both fail
//!
//! [`Error`] ties them together. Cleanup failures raised by user hooks travel
//! as [`BoxError`] and are never rewrapped when a stack tracked a single
//! record, so callers can downcast them back to their own types.

use std::error::Error as StdError;
use std::fmt;

use crate::record::Mode;

/// A boxed error returned by cleanup hooks.
pub type BoxError = Box<dyn StdError + Send + Sync + 'static>;

// ============================================================================
// Error
// ============================================================================

/// Error produced by stack operations.
///
/// # Variants
///
/// - `InvalidResource` - recognition failed when the value was added
/// - `AlreadyDisposed` - the stack was disposed before the value was added
/// - `Dispose` - a single cleanup hook failed; the hook's error is kept as-is
/// - `Source` - the sequence feeding a batch or streaming adapter failed
/// - `Aggregate` - several failures from the same unwind
#[derive(Debug)]
#[non_exhaustive]
pub enum Error {
    /// The value exposes no cleanup this stack can run.
    InvalidResource(InvalidResource),
    /// The stack had already been disposed.
    AlreadyDisposed(AlreadyDisposed),
    /// A cleanup hook failed.
    Dispose(BoxError),
    /// The source sequence failed while being consumed.
    Source(BoxError),
    /// Several failures collected during one unwind.
    Aggregate(AggregateError),
}

impl Error {
    /// Returns true if this is a recognition failure.
    pub fn is_invalid_resource(&self) -> bool {
        matches!(self, Error::InvalidResource(_))
    }

    /// Returns true if this error was raised by adding to a disposed stack.
    pub fn is_already_disposed(&self) -> bool {
        matches!(self, Error::AlreadyDisposed(_))
    }

    /// Returns true if this error combines several failures.
    pub fn is_aggregate(&self) -> bool {
        matches!(self, Error::Aggregate(_))
    }

    /// Returns the aggregate, if this is one.
    pub fn as_aggregate(&self) -> Option<&AggregateError> {
        match self {
            Error::Aggregate(aggregate) => Some(aggregate),
            _ => None,
        }
    }

    /// Returns the hook or source error without any wrapping.
    ///
    /// For `Dispose` and `Source` this hands back the exact box the hook or
    /// source produced.
    pub fn into_inner(self) -> Option<BoxError> {
        match self {
            Error::Dispose(e) | Error::Source(e) => Some(e),
            _ => None,
        }
    }

    /// Downcast a `Dispose` or `Source` error to a concrete type.
    pub fn downcast_ref<T: StdError + 'static>(&self) -> Option<&T> {
        match self {
            Error::Dispose(e) | Error::Source(e) => e.downcast_ref::<T>(),
            _ => None,
        }
    }

    /// All non-aggregate errors reachable from this one, depth first.
    ///
    /// Aggregate causes are visited after the aggregate's own errors.
    pub fn leaves(&self) -> Vec<&Error> {
        let mut out = Vec::new();
        self.collect_leaves(&mut out);
        out
    }

    fn collect_leaves<'a>(&'a self, out: &mut Vec<&'a Error>) {
        match self {
            Error::Aggregate(aggregate) => {
                for error in &aggregate.errors {
                    error.collect_leaves(out);
                }
                if let Some(cause) = &aggregate.cause {
                    cause.collect_leaves(out);
                }
            }
            other => out.push(other),
        }
    }

    /// Split a cause-free aggregate back into its members.
    ///
    /// Used when a rollback's disposal failures are merged with the error
    /// that triggered the rollback.
    pub(crate) fn unpack(self) -> Vec<Error> {
        match self {
            Error::Aggregate(aggregate) if aggregate.cause.is_none() => aggregate.errors,
            other => vec![other],
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::InvalidResource(e) => write!(f, "{}", e),
            Error::AlreadyDisposed(e) => write!(f, "{}", e),
            Error::Dispose(e) => write!(f, "{}", e),
            Error::Source(e) => write!(f, "source failed: {}", e),
            Error::Aggregate(e) => write!(f, "{}", e),
        }
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            Error::InvalidResource(e) => Some(e),
            Error::AlreadyDisposed(e) => Some(e),
            Error::Dispose(e) | Error::Source(e) => Some(&**e),
            Error::Aggregate(e) => Some(e),
        }
    }
}

impl From<InvalidResource> for Error {
    fn from(e: InvalidResource) -> Self {
        Error::InvalidResource(e)
    }
}

impl From<AlreadyDisposed> for Error {
    fn from(e: AlreadyDisposed) -> Self {
        Error::AlreadyDisposed(e)
    }
}

impl From<AggregateError> for Error {
    fn from(e: AggregateError) -> Self {
        Error::Aggregate(e)
    }
}

/// Shape the failures of one unwind.
///
/// No failures is success. A single failure is returned unchanged unless
/// `force_aggregate` is set, which disposal does whenever more than one
/// record was tracked.
pub(crate) fn shape(mut errors: Vec<Error>, force_aggregate: bool) -> Result<(), Error> {
    match errors.len() {
        0 => Ok(()),
        1 if !force_aggregate => Err(errors.remove(0)),
        _ => Err(Error::Aggregate(AggregateError::new(errors))),
    }
}

/// Combine a non-empty list of failures into one error.
pub(crate) fn combine(errors: Vec<Error>) -> Error {
    match shape(errors, false) {
        Err(error) => error,
        Ok(()) => Error::Aggregate(AggregateError::new(Vec::new())),
    }
}

// ============================================================================
// InvalidResource
// ============================================================================

/// A value failed every recognition rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvalidResource {
    description: String,
    flavor: Mode,
}

impl InvalidResource {
    /// Create a recognition error for a value offered to a `flavor` stack.
    pub fn new(description: impl Into<String>, flavor: Mode) -> Self {
        InvalidResource {
            description: description.into(),
            flavor,
        }
    }

    /// Describes the rejected value.
    pub fn description(&self) -> &str {
        &self.description
    }

    /// Flavor of the stack that rejected the value.
    pub fn flavor(&self) -> Mode {
        self.flavor
    }
}

impl fmt::Display for InvalidResource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "invalid resource: {} cannot be disposed by a {} stack",
            self.description, self.flavor
        )
    }
}

impl StdError for InvalidResource {}

// ============================================================================
// AlreadyDisposed
// ============================================================================

/// A value was added to a stack that had already been disposed.
///
/// The value is disposed on the spot before this error is returned. If that
/// rollback fails, its error is kept as the cause.
#[derive(Debug, Default)]
pub struct AlreadyDisposed {
    cause: Option<Box<Error>>,
}

impl AlreadyDisposed {
    /// Create the error, attaching the rollback failure if there was one.
    pub fn new(cause: Option<Error>) -> Self {
        AlreadyDisposed {
            cause: cause.map(Box::new),
        }
    }

    /// The failure from disposing the rejected value, if any.
    pub fn cause(&self) -> Option<&Error> {
        self.cause.as_deref()
    }
}

impl fmt::Display for AlreadyDisposed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.cause {
            Some(cause) => write!(f, "stack already disposed; rollback also failed: {}", cause),
            None => write!(f, "stack already disposed"),
        }
    }
}

impl StdError for AlreadyDisposed {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.cause.as_deref().map(|e| e as &(dyn StdError + 'static))
    }
}

// ============================================================================
// AggregateError
// ============================================================================

/// Several failures observed during one unwind.
///
/// Errors are kept in the order they happened, which for disposal is
/// most-recently-added first.
#[derive(Debug)]
pub struct AggregateError {
    errors: Vec<Error>,
    cause: Option<Box<Error>>,
}

impl AggregateError {
    /// Create an aggregate from an ordered list of errors.
    pub fn new(errors: Vec<Error>) -> Self {
        AggregateError {
            errors,
            cause: None,
        }
    }

    /// Attach a secondary cause.
    pub fn with_cause(mut self, cause: Error) -> Self {
        self.cause = Some(Box::new(cause));
        self
    }

    /// The collected errors, in the order they happened.
    pub fn errors(&self) -> &[Error] {
        &self.errors
    }

    /// Consume the aggregate and return its errors.
    pub fn into_errors(self) -> Vec<Error> {
        self.errors
    }

    /// The secondary cause, if any.
    pub fn cause(&self) -> Option<&Error> {
        self.cause.as_deref()
    }

    /// Number of directly collected errors.
    pub fn len(&self) -> usize {
        self.errors.len()
    }

    /// Returns true if nothing was collected.
    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }
}

impl fmt::Display for AggregateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} error(s) during disposal", self.errors.len())?;
        for (i, error) in self.errors.iter().enumerate() {
            let sep = if i == 0 { ": " } else { "; " };
            write!(f, "{}{}", sep, error)?;
        }
        if let Some(cause) = &self.cause {
            write!(f, " (caused by: {})", cause)?;
        }
        Ok(())
    }
}

impl StdError for AggregateError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.cause
            .as_deref()
            .or_else(|| self.errors.first())
            .map(|e| e as &(dyn StdError + 'static))
    }
}

// ============================================================================
// HookPanicked
// ============================================================================

/// A cleanup hook panicked instead of returning an error.
///
/// The panic is caught so the rest of the stack still unwinds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HookPanicked {
    message: String,
}

impl HookPanicked {
    pub(crate) fn from_payload(payload: Box<dyn std::any::Any + Send>) -> Self {
        let message = match payload.downcast::<String>() {
            Ok(s) => *s,
            Err(payload) => match payload.downcast::<&'static str>() {
                Ok(s) => (*s).to_string(),
                Err(_) => "<non-string panic payload>".to_string(),
            },
        };
        HookPanicked { message }
    }

    /// The panic message.
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl fmt::Display for HookPanicked {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "cleanup hook panicked: {}", self.message)
    }
}

impl StdError for HookPanicked {}

// ============================================================================
// ScopeError
// ============================================================================

/// Outcome of a scope whose body and cleanup can both fail.
///
/// A failing scope behaves like a `finally` block with one deliberate
/// inversion: when the body fails, the body's error is what the caller sees,
/// and any cleanup failure rides along as `suppressed`. A cleanup failure
/// never replaces a body failure.
#[derive(Debug)]
pub enum ScopeError<E> {
    /// The body failed. Cleanup may also have failed.
    Body {
        /// The error from the body.
        error: E,
        /// The cleanup failure that happened while unwinding, if any.
        suppressed: Option<Error>,
    },
    /// The body succeeded and cleanup failed.
    Dispose(Error),
}

impl<E> ScopeError<E> {
    /// Returns the body error, if any.
    pub fn body_error(&self) -> Option<&E> {
        match self {
            ScopeError::Body { error, .. } => Some(error),
            ScopeError::Dispose(_) => None,
        }
    }

    /// Returns the cleanup failure that accompanied a body error.
    pub fn suppressed(&self) -> Option<&Error> {
        match self {
            ScopeError::Body { suppressed, .. } => suppressed.as_ref(),
            ScopeError::Dispose(_) => None,
        }
    }

    /// Returns the cleanup failure when the body succeeded.
    pub fn dispose_error(&self) -> Option<&Error> {
        match self {
            ScopeError::Dispose(e) => Some(e),
            ScopeError::Body { .. } => None,
        }
    }

    /// Consume and return the body error, discarding cleanup information.
    pub fn into_body_error(self) -> Option<E> {
        match self {
            ScopeError::Body { error, .. } => Some(error),
            ScopeError::Dispose(_) => None,
        }
    }

    /// Maps the body error using the provided function.
    pub fn map<F, E2>(self, f: F) -> ScopeError<E2>
    where
        F: FnOnce(E) -> E2,
    {
        match self {
            ScopeError::Body { error, suppressed } => ScopeError::Body {
                error: f(error),
                suppressed,
            },
            ScopeError::Dispose(e) => ScopeError::Dispose(e),
        }
    }
}

impl<E: fmt::Display> fmt::Display for ScopeError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScopeError::Body {
                error,
                suppressed: None,
            } => write!(f, "{}", error),
            ScopeError::Body {
                error,
                suppressed: Some(suppressed),
            } => write!(f, "{}; cleanup also failed: {}", error, suppressed),
            ScopeError::Dispose(e) => write!(f, "cleanup failed: {}", e),
        }
    }
}

impl<E: StdError + 'static> StdError for ScopeError<E> {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            ScopeError::Body { error, .. } => Some(error),
            ScopeError::Dispose(e) => Some(e),
        }
    }
}
