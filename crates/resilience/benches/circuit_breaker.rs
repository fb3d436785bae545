//! Benchmarks for the circuit breaker
//!
//! Measures:
//! - allow_request() on the lock-free closed path and the locked open path
//! - call() with successful operations
//! - Full trip and recovery cycle

use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use std::hint::black_box;
use std::io;
use std::time::Duration;
use switchyard_resilience::{CircuitBreaker, CircuitBreakerConfig, ManualClock};

fn refused() -> io::Error {
    io::Error::from(io::ErrorKind::ConnectionRefused)
}

fn circuit_breaker_allow_request(c: &mut Criterion) {
    let mut group = c.benchmark_group("circuit_breaker/allow_request");

    group.bench_function("closed", |b| {
        let cb = CircuitBreaker::with_defaults("bench").unwrap();
        b.iter(|| black_box(cb.allow_request()));
    });

    group.bench_function("open", |b| {
        let cb = CircuitBreaker::new("bench", CircuitBreakerConfig::new(1, Duration::from_secs(3600)))
            .unwrap();
        cb.record_failure(&refused());
        b.iter(|| black_box(cb.allow_request()));
    });

    group.finish();
}

fn circuit_breaker_call(c: &mut Criterion) {
    let mut group = c.benchmark_group("circuit_breaker/call");

    for &threshold in &[5u32, 50] {
        group.bench_with_input(
            BenchmarkId::new("success", threshold),
            &threshold,
            |b, &threshold| {
                let rt = tokio::runtime::Runtime::new().unwrap();
                let cb = CircuitBreaker::new(
                    "bench",
                    CircuitBreakerConfig::new(threshold, Duration::from_secs(60)),
                )
                .unwrap();

                b.to_async(&rt).iter(|| async {
                    let result = cb.call(|| async { Ok::<_, io::Error>(black_box(42)) }).await;
                    black_box(result)
                });
            },
        );
    }

    group.finish();
}

fn circuit_breaker_cycle(c: &mut Criterion) {
    c.bench_function("circuit_breaker/trip_and_recover", |b| {
        let clock = ManualClock::new();
        let cb = CircuitBreaker::new("bench", CircuitBreakerConfig::new(3, Duration::from_secs(1)))
            .unwrap()
            .with_clock(clock.shared());

        b.iter(|| {
            for _ in 0..3 {
                cb.record_failure(&refused());
            }
            clock.advance(Duration::from_secs(1));
            black_box(cb.allow_request());
            cb.record_success();
        });
    });
}

criterion_group!(
    benches,
    circuit_breaker_allow_request,
    circuit_breaker_call,
    circuit_breaker_cycle
);
criterion_main!(benches);
