//! Benchmarks for CellarKV storage operations

use criterion::{black_box, criterion_group, criterion_main, BatchSize, Criterion};
use cellarkv::{Config, Environment, WalSyncStrategy};
use tempfile::TempDir;

fn open_env() -> (TempDir, Environment) {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let config = Config::builder()
        .data_dir(temp_dir.path())
        .wal_sync_strategy(WalSyncStrategy::EveryNEntries { count: 1000 })
        .build();
    let env = Environment::open(config).expect("Failed to open environment");
    (temp_dir, env)
}

fn storage_benchmarks(c: &mut Criterion) {
    let (_dir, env) = open_env();
    let store = env.create_store("bench", false).unwrap();
    for i in 0..10_000u32 {
        store.put(format!("key_{:08}", i), i.to_le_bytes()).unwrap();
    }

    // Single key write throughput (one commit per put)
    c.bench_function("store_put", |b| {
        let mut i = 0u64;
        b.iter(|| {
            store.put(format!("w_{:016}", i), b"value").unwrap();
            i += 1;
        })
    });

    // Single key read throughput
    c.bench_function("store_get", |b| {
        let mut i = 0u32;
        b.iter(|| {
            let key = format!("key_{:08}", i % 10_000);
            black_box(store.get(key).unwrap());
            i += 1;
        })
    });

    // Batched writes: many puts under one write cursor
    c.bench_function("cursor_put_batch_100", |b| {
        let mut batch = 0u64;
        b.iter(|| {
            let mut cursor = store.cursor(false).unwrap();
            for j in 0..100u64 {
                cursor
                    .put(format!("b_{:012}_{:03}", batch, j), b"value")
                    .unwrap();
            }
            cursor.commit().unwrap();
            batch += 1;
        })
    });

    // Ordered scan over 10k records
    c.bench_function("cursor_scan_10k", |b| {
        b.iter(|| {
            let mut cursor = store.cursor(true).unwrap();
            black_box(cursor.iter_from("key_").take(10_000).count());
        })
    });

    // Queue workload: post + pop
    let queue = env.create_store("queue", false).unwrap();
    c.bench_function("post_pop", |b| {
        b.iter(|| {
            queue.post(b"job").unwrap();
            black_box(queue.pop().unwrap());
        })
    });

    // Checkpoint of a populated environment
    c.bench_function("checkpoint", |b| {
        b.iter_batched(
            || store.put("dirty", b"x").unwrap(),
            |_| env.checkpoint().unwrap(),
            BatchSize::SmallInput,
        )
    });
}

criterion_group!(benches, storage_benchmarks);
criterion_main!(benches);
