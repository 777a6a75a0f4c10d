//! Performance benchmarks for the filter lock and full pipeline runs
//! Measures lock hand-off cost and word-count throughput across worker
//! counts, with the mutex engine as a baseline for the filter lock

use criterion::{criterion_group, criterion_main, BatchSize, BenchmarkId, Criterion, Throughput};
use filtermr::pipeline::{CollectWriter, Engine};
use filtermr::{wordcount, FilterLock, GroupingMap};
use std::hint::black_box;
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Runtime;

const SAMPLE: &str = "Deer Bear River\nCar Car River\nDeer Car Bear";

fn bench_filter_lock(c: &mut Criterion) {
    let mut group = c.benchmark_group("filter_lock");
    group.measurement_time(Duration::from_secs(5));

    group.bench_function("uncontended_single_worker", |b| {
        let lock = FilterLock::new(1, 0u64);
        b.iter(|| {
            *lock.lock_blocking(0) += 1;
        });
    });

    for workers in [2, 4, 8] {
        let iterations = 1_000u64;
        group.throughput(Throughput::Elements(workers as u64 * iterations));
        group.bench_with_input(
            BenchmarkId::new("contended_threads", workers),
            &workers,
            |b, &workers| {
                b.iter(|| {
                    let lock = Arc::new(FilterLock::new(workers, 0u64));
                    let handles: Vec<_> = (0..workers)
                        .map(|id| {
                            let lock = Arc::clone(&lock);
                            std::thread::spawn(move || {
                                for _ in 0..iterations {
                                    *lock.lock_blocking(id) += 1;
                                }
                            })
                        })
                        .collect();
                    for handle in handles {
                        handle.join().unwrap();
                    }
                    black_box(lock)
                });
            },
        );
    }

    group.finish();
}

fn bench_grouping_map(c: &mut Criterion) {
    let mut group = c.benchmark_group("grouping_map");

    for buckets in [1, 53, 353] {
        group.bench_with_input(
            BenchmarkId::new("upsert_1000_keys", buckets),
            &buckets,
            |b, &buckets| {
                b.iter_batched(
                    || GroupingMap::with_buckets(buckets),
                    |map| {
                        for i in 0..10_000u32 {
                            map.upsert(i % 1000, || 1u32, |count: &mut u32| *count += 1);
                        }
                        black_box(map)
                    },
                    BatchSize::SmallInput,
                );
            },
        );
    }

    group.finish();
}

fn bench_word_count(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let text = vec![SAMPLE; 2_000].join("\n");
    let mut group = c.benchmark_group("word_count");
    group.sample_size(20);
    group.throughput(Throughput::Elements(text.split_whitespace().count() as u64));

    for engine in [Engine::FilterLock, Engine::Mutex] {
        for workers in [1, 2, 4, 8] {
            group.bench_with_input(
                BenchmarkId::new(engine.to_string(), workers),
                &workers,
                |b, &workers| {
                    let pipeline = wordcount::pipeline()
                        .with_writer(CollectWriter::<String, u64>::new())
                        .with_engine(engine)
                        .build()
                        .unwrap();
                    let (pipeline, text) = (&pipeline, &text);
                    b.to_async(&rt).iter(|| async move {
                        black_box(pipeline.run(text.clone(), workers).await.unwrap())
                    });
                },
            );
        }
    }

    group.finish();
}

criterion_group!(benches, bench_filter_lock, bench_grouping_map, bench_word_count);

criterion_main!(benches);
