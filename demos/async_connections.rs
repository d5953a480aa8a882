//! Async Connections Example
//!
//! Demonstrates asynchronous disposal stacks with simulated connections.
//!
//! Shows practical patterns including:
//! - Mixing async and sync cleanups on one stack
//! - Awaited, strictly ordered teardown
//! - Aggregated cleanup failures
//! - Per-item scoping over a stream of accepted connections
//!
//! Run with: cargo run --example async_connections

use std::ops::ControlFlow;
use std::sync::Arc;
use std::time::Duration;

use disposable::{AsyncDispose, AsyncDisposableStack, BoxError, Candidate, ScopeError};
use futures::future::BoxFuture;
use futures::stream::{self, StreamExt};

struct Connection {
    peer: String,
    fail_on_close: bool,
}

impl Connection {
    fn new(peer: &str) -> Self {
        println!("  connected to {}", peer);
        Connection {
            peer: peer.to_string(),
            fail_on_close: false,
        }
    }

    fn flaky(peer: &str) -> Self {
        Connection {
            fail_on_close: true,
            ..Connection::new(peer)
        }
    }
}

impl AsyncDispose for Connection {
    fn dispose_async(&self) -> BoxFuture<'_, Result<(), BoxError>> {
        Box::pin(async move {
            tokio::time::sleep(Duration::from_millis(5)).await;
            if self.fail_on_close {
                return Err(format!("{}: close handshake timed out", self.peer).into());
            }
            println!("  closed {}", self.peer);
            Ok(())
        })
    }
}

// ==================== Ordered Teardown ====================

async fn example_ordered_teardown() {
    println!("\n=== Example 1: Ordered Teardown ===");

    let result: Result<(), ScopeError<BoxError>> = AsyncDisposableStack::scope(|adder| async move {
        adder.use_async(Connection::new("db:5432"))?;
        adder.defer(|| {
            println!("  flushed metrics");
            Ok(())
        })?;
        adder.use_async(Connection::new("cache:6379"))?;
        Ok(())
    })
    .await;

    println!("  Result: {:?}", result.map_err(|e| e.to_string()));
}

// ==================== Aggregated Failures ====================

async fn example_aggregate() {
    println!("\n=== Example 2: Aggregated Failures ===");

    let stack = AsyncDisposableStack::new();
    let _ = stack.use_async(Connection::flaky("replica-1:5432"));
    let _ = stack.use_async(Connection::new("primary:5432"));
    let _ = stack.use_async(Connection::flaky("replica-2:5432"));

    match stack.dispose().await {
        Ok(()) => println!("  all closed"),
        Err(err) => {
            for leaf in err.leaves() {
                println!("  failure: {}", leaf);
            }
        }
    }
}

// ==================== Per-Connection Scoping ====================

async fn example_accept_loop() {
    println!("\n=== Example 3: Per-Connection Scoping ===");

    // connections are only accepted when the loop pulls them
    let accepted = stream::iter(["client-1", "client-2", "client-3"])
        .map(|peer| Ok::<_, std::io::Error>(Arc::new(Connection::new(peer))));

    let result: Result<(), ScopeError<BoxError>> =
        AsyncDisposableStack::using_from_stream(accepted, |conn: &Arc<Connection>| {
            Candidate::async_dispose(conn.clone())
        })
        .for_each_scoped(|conn| async move {
            println!("  serving {}", conn.peer);
            if conn.peer == "client-2" {
                return Ok(ControlFlow::Break(()));
            }
            Ok(ControlFlow::Continue(()))
        })
        .await;

    println!("  Result: {:?}", result.map_err(|e| e.to_string()));
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .init();

    println!("Disposable Async Connections");
    println!("============================");

    example_ordered_teardown().await;
    example_aggregate().await;
    example_accept_loop().await;

    println!("\nDone.");
}
