//! Observability demonstration
//!
//! A flaky backend behind a resilient caller, with a logging hook and a
//! metrics hook watching every breaker, retry and fallback decision.

use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use switchyard_resilience::observability::{LogLevel, LoggingHook, MetricsHook};
use switchyard_resilience::prelude::*;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "debug".into()))
        .init();

    println!("=== Observability Demonstration ===\n");

    let metrics = Arc::new(MetricsHook::new());
    let hooks = ObservabilityHooks::new()
        .with_hook(Arc::clone(&metrics) as Arc<dyn ObservabilityHook>)
        .with_hook(Arc::new(LoggingHook::new(LogLevel::Info)));

    let registry = BreakerRegistry::new(CircuitBreakerConfig::new(3, Duration::from_secs(2)))?
        .with_hooks(hooks.clone());
    let retry = RetryPolicy::new(
        2,
        Backoff::exponential(Duration::from_millis(50), Duration::from_millis(500)).with_jitter(true),
    )?
    .with_name("inventory-api")
    .with_hooks(hooks.clone());

    let caller = ResilientCaller::<String, io::Error>::builder(registry.get_or_create("inventory-api"))
        .retry(retry)
        .timeout(Duration::from_millis(200))
        .fallback(|_| Ok("stale inventory".to_string()))
        .hooks(hooks)
        .build()?;

    let calls = AtomicU32::new(0);
    for round in 1..=6 {
        let answer = caller
            .call(|| async {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                if n < 4 {
                    Err(io::Error::from(io::ErrorKind::ConnectionReset))
                } else {
                    Ok(format!("fresh inventory #{n}"))
                }
            })
            .await?;
        println!("round {round}: {answer}");
        if round == 3 {
            println!("waiting out the recovery timeout...");
            tokio::time::sleep(Duration::from_secs(2)).await;
        }
    }

    let snapshot = metrics.snapshot();
    println!("\n=== Metrics ===");
    println!("trips: {}", snapshot.trips);
    println!("recoveries: {}", snapshot.recoveries);
    println!("rejected: {}", snapshot.rejected);
    println!("retry attempts: {}", snapshot.total_retry_attempts());
    println!("fallbacks: {}", snapshot.fallbacks);
    println!("breakers: {:?}", registry.snapshot());

    Ok(())
}
