//! # amqp-rpc Benchmarks
//!
//! | Area | Operation |
//! |------|-----------|
//! | Registry | register + fulfil + take, no waiting |
//! | Registry | fulfil waking a parked waiter |
//! | Registry | TTL sweep over a full table |
//! | Client | send + await over the in-memory broker |

use amqp_rpc::{CorrelationId, CorrelationRegistry, InMemoryBroker};
use bytes::Bytes;
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use futures::future::join_all;
use rpc_tests::harness::{client_on, Behaviour, Responder};
use std::sync::Arc;
use std::time::Duration;

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_multi_thread()
        .worker_threads(4)
        .enable_all()
        .build()
        .unwrap()
}

fn bench_registry_cycle(c: &mut Criterion) {
    let mut group = c.benchmark_group("registry");
    let registry = CorrelationRegistry::new();
    let payload = Bytes::from_static(b"{\"litres\":120.5}");

    group.bench_function("register_fulfil_take", |b| {
        b.iter(|| {
            let id = CorrelationId::new();
            registry.register(id).unwrap();
            registry.fulfil(&id, payload.clone());
            black_box(registry.take(&id))
        })
    });

    let rt = runtime();
    group.bench_function("fulfil_wakes_waiter", |b| {
        let registry = Arc::new(CorrelationRegistry::new());
        b.to_async(&rt).iter(|| {
            let registry = Arc::clone(&registry);
            let payload = payload.clone();
            async move {
                let id = CorrelationId::new();
                registry.register(id).unwrap();
                let waiter = {
                    let registry = Arc::clone(&registry);
                    tokio::spawn(async move { registry.wait(&id, Duration::from_secs(1)).await })
                };
                registry.fulfil(&id, payload);
                black_box(waiter.await.unwrap())
            }
        })
    });

    for size in [1_000usize, 10_000] {
        group.throughput(Throughput::Elements(size as u64));
        group.bench_with_input(BenchmarkId::new("remove_expired", size), &size, |b, &size| {
            b.iter_batched(
                || {
                    let registry = CorrelationRegistry::new();
                    for _ in 0..size {
                        registry.register(CorrelationId::new()).unwrap();
                    }
                    registry
                },
                |registry| black_box(registry.remove_expired(Duration::ZERO)),
                criterion::BatchSize::LargeInput,
            )
        });
    }

    group.finish();
}

fn bench_client_round_trip(c: &mut Criterion) {
    let mut group = c.benchmark_group("client");
    let rt = runtime();

    let broker = InMemoryBroker::new();
    let (client, _worker) = rt.block_on(async {
        let worker = Responder::spawn(&broker, Behaviour::Echo);
        (Arc::new(client_on(&broker).await), worker)
    });

    group.bench_function("send_await", |b| {
        b.to_async(&rt).iter(|| {
            let client = Arc::clone(&client);
            async move {
                let id = client.send("ping", "requests").await.unwrap();
                black_box(client.await_response(&id, Duration::from_secs(1)).await)
            }
        })
    });

    for concurrency in [8usize, 64] {
        group.throughput(Throughput::Elements(concurrency as u64));
        group.bench_with_input(
            BenchmarkId::new("concurrent_send_await", concurrency),
            &concurrency,
            |b, &concurrency| {
                b.to_async(&rt).iter(|| {
                    let client = Arc::clone(&client);
                    async move {
                        let calls = (0..concurrency).map(|_| {
                            let client = Arc::clone(&client);
                            async move {
                                let id = client.send("ping", "requests").await.unwrap();
                                client.await_response(&id, Duration::from_secs(1)).await
                            }
                        });
                        black_box(join_all(calls).await)
                    }
                })
            },
        );
    }

    group.finish();
}

criterion_group!(benches, bench_registry_cycle, bench_client_round_trip);
criterion_main!(benches);
