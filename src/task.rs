//! Tokio task handles as resources.
//!
//! Disposing a task handle aborts the task. This lets background work
//! spawned inside a scope (heartbeats, timers, watchers) be torn down with
//! everything else on the stack.
//!
//! ```rust
//! use disposable::DisposableStack;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let stack = DisposableStack::new();
//! stack
//!     .use_resource(tokio::spawn(async {
//!         loop {
//!             tokio::time::sleep(std::time::Duration::from_secs(1)).await;
//!         }
//!     }))
//!     .unwrap();
//!
//! // aborts the ticker
//! stack.dispose().unwrap();
//! # }
//! ```

use tokio::task::{AbortHandle, JoinHandle};

use crate::capability::Dispose;
use crate::error::BoxError;

impl<T: Send + 'static> Dispose for JoinHandle<T> {
    fn dispose(&self) -> Result<(), BoxError> {
        self.abort();
        Ok(())
    }
}

impl Dispose for AbortHandle {
    fn dispose(&self) -> Result<(), BoxError> {
        self.abort();
        Ok(())
    }
}
