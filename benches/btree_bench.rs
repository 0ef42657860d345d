use criterion::{criterion_group, criterion_main, BatchSize, BenchmarkId, Criterion};
use rand::prelude::*;
use std::sync::Arc;

use keeldb::common::types::Rid;
use keeldb::index::btree::BTreeIndex;
use keeldb::storage::buffer::BufferPoolManager;
use tempfile::TempDir;

fn create_test_environment(buffer_pool_size: usize) -> (Arc<BufferPoolManager>, TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let buffer_pool = Arc::new(BufferPoolManager::new(buffer_pool_size, dir.path().join("bench.db")).unwrap());
    (buffer_pool, dir)
}

fn rid_for(key: i32) -> Rid {
    Rid::new(0, key as u32)
}

fn btree_benchmark(c: &mut Criterion) {
    let buffer_pool_size = 1000;
    let mut group = c.benchmark_group("BTreeIndex");

    for size in [1000i32, 10_000, 50_000] {
        group.bench_with_input(BenchmarkId::new("insert", size), &size, |b, &size| {
            let mut rng = StdRng::seed_from_u64(7);
            let mut keys: Vec<i32> = (0..size).collect();
            keys.shuffle(&mut rng);

            b.iter_batched(
                || create_test_environment(buffer_pool_size),
                |(buffer_pool, _dir)| {
                    let btree = BTreeIndex::<i32>::new(buffer_pool).unwrap();
                    for &key in &keys {
                        btree.insert(key, rid_for(key)).unwrap();
                    }
                },
                BatchSize::PerIteration,
            );
        });

        group.bench_with_input(BenchmarkId::new("lookup", size), &size, |b, &size| {
            let (buffer_pool, _dir) = create_test_environment(buffer_pool_size);
            let btree = BTreeIndex::<i32>::new(buffer_pool).unwrap();
            for key in 0..size {
                btree.insert(key, rid_for(key)).unwrap();
            }

            let mut rng = StdRng::seed_from_u64(11);
            let mut keys: Vec<i32> = (0..size).collect();
            keys.shuffle(&mut rng);
            let mut idx = 0;

            b.iter(|| {
                let key = keys[idx % keys.len()];
                let rids = btree.get_value(&key).unwrap();
                assert_eq!(rids.len(), 1);
                idx += 1;
            });
        });

        // Each scan covers a tenth of the keys
        group.bench_with_input(BenchmarkId::new("range_scan", size), &size, |b, &size| {
            let (buffer_pool, _dir) = create_test_environment(buffer_pool_size);
            let btree = BTreeIndex::<i32>::new(buffer_pool).unwrap();
            for key in 0..size {
                btree.insert(key, rid_for(key)).unwrap();
            }

            let range_size = size / 10;
            let ranges: Vec<(i32, i32)> = (0..10).map(|i| (i * range_size, (i + 1) * range_size - 1)).collect();
            let mut idx = 0;

            b.iter(|| {
                let (low, high) = ranges[idx % ranges.len()];
                let found = btree.range_scan(&low, &high).unwrap();
                assert_eq!(found.len(), range_size as usize);
                idx += 1;
            });
        });

        group.bench_with_input(BenchmarkId::new("remove", size), &size, |b, &size| {
            let mut rng = StdRng::seed_from_u64(13);
            let mut keys: Vec<i32> = (0..size).collect();
            keys.shuffle(&mut rng);

            b.iter_batched(
                || {
                    let (buffer_pool, dir) = create_test_environment(buffer_pool_size);
                    let btree = BTreeIndex::<i32>::new(buffer_pool).unwrap();
                    for key in 0..size {
                        btree.insert(key, rid_for(key)).unwrap();
                    }
                    (btree, dir)
                },
                |(btree, _dir)| {
                    for key in &keys {
                        btree.remove(key, &rid_for(*key)).unwrap();
                    }
                },
                BatchSize::PerIteration,
            );
        });
    }

    group.finish();
}

criterion_group! {
    name = benches;
    config = Criterion::default().sample_size(10);
    targets = btree_benchmark
}
criterion_main!(benches);
