//! # disposable
//!
//! Deterministic, scope-bound cleanup of resources.
//!
//! A [`DisposableStack`] collects cleanups as resources are acquired and runs
//! them in reverse order, exactly once, collecting every failure instead of
//! stopping at the first. [`AsyncDisposableStack`] does the same for cleanups
//! that must be awaited.
//!
//! ## Quick Example
//!
//! ```rust
//! use disposable::{BoxError, DisposableStack, Dispose, ScopeError};
//!
//! struct Connection {
//!     id: u32,
//! }
//!
//! impl Dispose for Connection {
//!     fn dispose(&self) -> Result<(), BoxError> {
//!         println!("closing connection {}", self.id);
//!         Ok(())
//!     }
//! }
//!
//! let result: Result<u32, ScopeError<BoxError>> = DisposableStack::scope(|adder| {
//!     let primary = adder.use_resource(Connection { id: 1 })?;
//!     let replica = adder.use_resource(Connection { id: 2 })?;
//!     Ok(primary.id + replica.id)
//! });
//!
//! // both connections are closed here, replica first
//! assert_eq!(result.unwrap(), 3);
//! ```
//!
//! ## Building blocks
//!
//! - [`Candidate`] and [`Record`]: what a value offers and what a stack keeps
//! - [`DisposableStack`] / [`AsyncDisposableStack`]: the aggregate stacks
//! - [`Pass`] / [`AsyncPass`]: one stack per loop pass
//! - [`UsingFrom`] / [`AsyncUsingFrom`]: one scope per item of a sequence
//! - [`Error`], [`AggregateError`], [`ScopeError`]: what can go wrong
//!
//! ## Error precedence
//!
//! Cleanup behaves like a `finally` block with one deliberate difference:
//! when the protected body fails, the body's error is the one returned.
//! Cleanup failures ride along as [`ScopeError::Body::suppressed`](ScopeError)
//! and never replace it.

#![warn(missing_docs)]
#![warn(missing_debug_implementations)]

pub mod capability;
pub mod error;
pub mod record;
pub mod scope;
pub mod stack;
pub mod streaming;
#[cfg(feature = "tokio")]
pub mod task;
pub mod testing;

// Re-exports
pub use capability::{AsyncDispose, Callback, Candidate, Capability, Dispose, ASYNC_DISPOSE, DISPOSE};
pub use error::{
    AggregateError, AlreadyDisposed, BoxError, Error, HookPanicked, InvalidResource, ScopeError,
};
pub use record::{Mode, Record};
pub use scope::{Pass, PassState};
pub use stack::{Adder, DisposableStack, DropPolicy};
pub use streaming::UsingFrom;

#[cfg(feature = "async")]
pub use scope::AsyncPass;
#[cfg(feature = "async")]
pub use stack::{AsyncAdder, AsyncDisposableStack};
#[cfg(feature = "async")]
pub use streaming::AsyncUsingFrom;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::capability::{AsyncDispose, Candidate, Dispose};
    pub use crate::error::{BoxError, Error, ScopeError};
    pub use crate::stack::{Adder, DisposableStack, DropPolicy};

    #[cfg(feature = "async")]
    pub use crate::stack::{AsyncAdder, AsyncDisposableStack};
}
