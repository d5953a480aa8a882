//! Per-item scoped disposal over a sequence.
//!
//! [`UsingFrom`] and [`AsyncUsingFrom`] wrap a source and a mapping from each
//! item to a [`Candidate`](crate::Candidate). At most one item is live at a
//! time: its cleanup runs before the next item is pulled, on close, and on
//! drop. Items the consumer never pulled are never mapped, so they are
//! never disposed either.
//!
//! Once the adapter fails (source error, recognition failure or cleanup
//! failure) it yields that error once and then ends. The source is dropped
//! at that point, which is how a Rust iterator is closed.

#[cfg(feature = "async")]
pub mod async_using_from;
pub mod using_from;

#[cfg(feature = "async")]
pub use async_using_from::AsyncUsingFrom;
pub use using_from::UsingFrom;
