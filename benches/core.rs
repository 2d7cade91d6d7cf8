//! Performance benchmarks for nimsforest-core
//!
//! Run with: cargo bench

use bytes::Bytes;
use criterion::{criterion_group, criterion_main, Criterion};
use nimsforest_core::{Leaf, Runtime};

fn bench_leaf_creation(c: &mut Criterion) {
    c.bench_function("Leaf::new", |b| {
        b.iter(|| Leaf::new("payment.completed", Bytes::from_static(b"{}"), "stripe-tree"));
    });

    c.bench_function("Leaf::with_json", |b| {
        b.iter(|| {
            Leaf::with_json(
                "payment.completed",
                "stripe-tree",
                &serde_json::json!({"customerId": "cus_alice", "amount": 150.0}),
            )
        });
    });
}

fn bench_leaf_serialization(c: &mut Criterion) {
    let leaf = Leaf::with_json(
        "payment.completed",
        "stripe-tree",
        &serde_json::json!({"customerId": "cus_alice", "amount": 150.0, "currency": "usd"}),
    )
    .unwrap();

    c.bench_function("Leaf serialize", |b| {
        b.iter(|| leaf.to_bytes().unwrap());
    });

    let bytes = leaf.to_bytes().unwrap();
    c.bench_function("Leaf deserialize", |b| {
        b.iter(|| Leaf::from_bytes(&bytes).unwrap());
    });
}

fn bench_wind_drop_leaf(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();

    c.bench_function("Wind::drop_leaf", |b| {
        b.to_async(&rt).iter(|| async {
            let runtime = Runtime::in_memory();
            runtime
                .wind
                .drop_leaf(Leaf::new("payment.completed", Bytes::from_static(b"{}"), "stripe-tree"))
                .await
                .unwrap()
        });
    });
}

fn bench_river_flow_throughput(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();

    let mut group = c.benchmark_group("river_flow_throughput");
    for count in [10, 100, 1000] {
        group.bench_function(format!("{count} records"), |b| {
            b.to_async(&rt).iter(|| async {
                let runtime = Runtime::in_memory();
                for i in 0..count {
                    runtime
                        .river
                        .flow("river.stripe.webhook", Bytes::from(format!("{{\"i\":{i}}}")))
                        .await
                        .unwrap();
                }
            });
        });
    }
    group.finish();
}

criterion_group!(
    benches,
    bench_leaf_creation,
    bench_leaf_serialization,
    bench_wind_drop_leaf,
    bench_river_flow_throughput,
);
criterion_main!(benches);
