//! Per-pass adapters and scoped helpers.
//!
//! A pass owns a fresh stack and yields exactly one value: an adder for that
//! stack, or a single tracked resource. Closing the pass disposes the stack.
//!
//! | state         | `advance`                  | `close` / `close_with_error` |
//! |---------------|----------------------------|------------------------------|
//! | `NotYielded`  | yield, move to `Yielded`   | dispose, move to `Closed`    |
//! | `Yielded`     | dispose, move to `Closed`  | dispose, move to `Closed`    |
//! | `Closed`      | nothing                    | nothing                      |
//!
//! The scoped helpers ([`DisposableStack::scope`](crate::DisposableStack::scope)
//! and friends) drive a pass around a closure so that every exit path,
//! including `?` and panics, closes it. When the closure fails, its error is
//! what the caller gets back. A cleanup failure is only attached to it as
//! [`ScopeError::Body::suppressed`](crate::ScopeError::Body).

#[cfg(feature = "async")]
pub mod async_pass;
pub mod pass;

#[cfg(feature = "async")]
pub use async_pass::AsyncPass;
pub use pass::Pass;

/// Where a pass is in its single-yield lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PassState {
    /// Nothing yielded yet.
    NotYielded,
    /// The value was handed out; the stack is still pending.
    Yielded,
    /// The stack was disposed. Terminal.
    Closed,
}
