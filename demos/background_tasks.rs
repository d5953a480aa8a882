//! Background Tasks Example
//!
//! Demonstrates tracking spawned tokio tasks so that leaving a scope aborts
//! them along with every other resource.
//!
//! Run with: cargo run --example background_tasks --features tokio

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use disposable::{AsyncDisposableStack, BoxError, ScopeError};

#[tokio::main]
async fn main() {
    println!("Disposable Background Tasks");
    println!("===========================");

    let ticks = Arc::new(AtomicUsize::new(0));
    let counter = ticks.clone();

    let result: Result<(), ScopeError<BoxError>> = AsyncDisposableStack::scope(|adder| async move {
        let heartbeat = tokio::spawn(async move {
            loop {
                counter.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        });
        adder.use_resource(heartbeat.abort_handle())?;
        adder.defer_async(|| async {
            println!("  heartbeat stopped");
            Ok(())
        })?;

        tokio::time::sleep(Duration::from_millis(55)).await;
        Ok(())
    })
    .await;

    let seen = ticks.load(Ordering::SeqCst);
    tokio::time::sleep(Duration::from_millis(50)).await;
    println!("  Result: {:?}", result.map_err(|e| e.to_string()));
    println!(
        "  Ticks at exit: {}, ticks after exit: {}",
        seen,
        ticks.load(Ordering::SeqCst)
    );
}
