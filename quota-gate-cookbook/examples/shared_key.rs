//! Two clients on one API key share every quota; a third key gets its own.

use quota_gate::{AcquireContext, Behavior, Limiter};
use quota_gate_cookbook::{exchange_registry, KeyedLimiters};
use std::time::Duration;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    println!("=== quota-gate: shared API key ===\n");

    let keys = KeyedLimiters::new(Behavior::Raise);
    let trader = keys.dispatcher("key-a");
    let monitor = keys.dispatcher("key-a");

    for i in 0..3 {
        let result = trader.dispatch("orders/add", || async move { i }).await;
        println!("trader  orders/add #{i}: {result:?}");
    }
    let result = monitor.dispatch("orders/cancel", || async { "cancelled" }).await;
    println!("monitor orders/cancel: {result:?}");

    let registry = exchange_registry(&keys.limiters("key-a"));
    for (endpoint, tiers) in registry.snapshot() {
        if tiers.iter().any(|tier| tier.consumed > 0) {
            println!("{endpoint}: {tiers:?}");
        }
    }

    println!("\nwaiting for the restricted tier to recover...");
    tokio::time::sleep(Duration::from_secs(1)).await;
    let ctx = AcquireContext::background();
    let admission = registry.resolve("orders/cancel").acquire(&ctx, 1, None).await?;
    println!("after 1s: {admission:?}");
    Ok(())
}
