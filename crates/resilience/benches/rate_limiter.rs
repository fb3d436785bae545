//! Benchmarks for the per-client rate limiter
//!
//! Measures:
//! - allow() for a single hot client
//! - allow() spread over many clients
//! - Contention from concurrent tasks on one client

use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use std::hint::black_box;
use std::sync::Arc;
use switchyard_resilience::{RateLimiter, RateLimiterConfig};

fn rate_limiter_single_client(c: &mut Criterion) {
    let mut group = c.benchmark_group("rate_limiter/single_client");

    for &rate in &[100u32, 10_000] {
        group.bench_with_input(BenchmarkId::new("allow", rate), &rate, |b, &rate| {
            let limiter = RateLimiter::new(RateLimiterConfig::new(rate, f64::from(rate))).unwrap();
            b.iter(|| black_box(limiter.allow("tenant")));
        });
    }

    group.bench_function("exempt", |b| {
        let limiter =
            RateLimiter::new(RateLimiterConfig::new(10, 10.0).with_exempt("internal")).unwrap();
        b.iter(|| black_box(limiter.allow("internal")));
    });

    group.finish();
}

fn rate_limiter_many_clients(c: &mut Criterion) {
    let mut group = c.benchmark_group("rate_limiter/many_clients");

    for &clients in &[10usize, 1_000] {
        let ids: Vec<String> = (0..clients).map(|i| format!("client-{i}")).collect();
        group.bench_with_input(BenchmarkId::new("allow", clients), &ids, |b, ids| {
            let limiter = RateLimiter::new(RateLimiterConfig::new(100, 100.0)).unwrap();
            let mut next = 0;
            b.iter(|| {
                next = (next + 1) % ids.len();
                black_box(limiter.allow(&ids[next]))
            });
        });
    }

    group.finish();
}

fn rate_limiter_contention(c: &mut Criterion) {
    c.bench_function("rate_limiter/contention", |b| {
        let rt = tokio::runtime::Runtime::new().unwrap();
        let limiter = Arc::new(RateLimiter::new(RateLimiterConfig::new(1_000, 1_000.0)).unwrap());

        b.to_async(&rt).iter(|| {
            let limiter = Arc::clone(&limiter);
            async move {
                let tasks: Vec<_> = (0..8)
                    .map(|_| {
                        let limiter = Arc::clone(&limiter);
                        tokio::spawn(async move { limiter.allow("shared") })
                    })
                    .collect();
                black_box(futures::future::join_all(tasks).await)
            }
        });
    });
}

criterion_group!(
    benches,
    rate_limiter_single_client,
    rate_limiter_many_clients,
    rate_limiter_contention
);
criterion_main!(benches);
