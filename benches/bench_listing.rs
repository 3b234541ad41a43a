use std::sync::Arc;

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use tokio::runtime::Runtime;
use userdir::test_support::users;
use userdir::{CacheStore, Directory, FanOutOptions, UserStore, VariantPolicy};

fn seeded_directory(runtime: &Runtime, count: usize, max_in_flight: usize) -> Directory {
    let store = Arc::new(CacheStore::new());
    runtime.block_on(async {
        for record in users(count) {
            store.put(&record).await.expect("seed record");
        }
    });
    Directory::new(store, VariantPolicy::cache()).with_fan_out(FanOutOptions {
        max_in_flight,
        ..FanOutOptions::default()
    })
}

fn bench_fan_out_listing(c: &mut Criterion) {
    let runtime = Runtime::new().expect("tokio runtime");
    let mut group = c.benchmark_group("fan_out_listing");

    for &count in &[100usize, 1_000, 10_000] {
        let directory = seeded_directory(&runtime, count, 64);
        group.bench_with_input(BenchmarkId::new("cache", count), &count, |b, _| {
            b.iter(|| runtime.block_on(directory.list_profiles()).expect("listing"));
        });
    }

    for &max_in_flight in &[1usize, 8, 256] {
        let directory = seeded_directory(&runtime, 1_000, max_in_flight);
        group.bench_with_input(
            BenchmarkId::new("max_in_flight", max_in_flight),
            &max_in_flight,
            |b, _| b.iter(|| runtime.block_on(directory.list_profiles()).expect("listing")),
        );
    }

    group.finish();
}

criterion_group!(benches, bench_fan_out_listing);
criterion_main!(benches);
