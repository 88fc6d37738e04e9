//! Store throughput benchmarks.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use tidekv_core::{Config, CoreError, Database};

fn open() -> Database {
    Database::open_in_memory_with_config(Config::default().maintenance_interval(None)).unwrap()
}

fn populated(count: usize) -> Database {
    let db = open();
    db.update(|tx| {
        for i in 0..count {
            tx.set(&format!("key:{i:08}"), format!("value-{i}"), None)?;
        }
        Ok::<_, CoreError>(())
    })
    .unwrap();
    db
}

/// Benchmark write transactions of varying size.
fn bench_set(c: &mut Criterion) {
    let mut group = c.benchmark_group("set");

    for batch in [1usize, 100, 1000] {
        group.throughput(Throughput::Elements(batch as u64));
        group.bench_with_input(BenchmarkId::from_parameter(batch), &batch, |b, &batch| {
            let db = open();
            let mut round = 0u64;
            b.iter(|| {
                round += 1;
                db.update(|tx| {
                    for i in 0..batch {
                        tx.set(&format!("key:{i:08}"), black_box(round.to_string()), None)?;
                    }
                    Ok::<_, CoreError>(())
                })
                .unwrap();
            });
        });
    }
    group.finish();
}

/// Benchmark point reads in a populated store.
fn bench_get(c: &mut Criterion) {
    let mut group = c.benchmark_group("get");

    for count in [1_000usize, 100_000] {
        group.bench_with_input(BenchmarkId::from_parameter(count), &count, |b, &count| {
            let db = populated(count);
            let tx = db.begin(false).unwrap();
            let mut i = 0;
            b.iter(|| {
                i = (i + 7919) % count;
                black_box(tx.get(&format!("key:{i:08}")).unwrap());
            });
        });
    }
    group.finish();
}

/// Benchmark ordered scans.
fn bench_ascend(c: &mut Criterion) {
    let mut group = c.benchmark_group("ascend");
    let db = populated(100_000);

    for len in [10usize, 1_000] {
        group.throughput(Throughput::Elements(len as u64));
        group.bench_with_input(BenchmarkId::from_parameter(len), &len, |b, &len| {
            let tx = db.begin(false).unwrap();
            b.iter(|| {
                let n = tx
                    .ascend(Some("key:00050000"), None)
                    .unwrap()
                    .take(len)
                    .count();
                black_box(n);
            });
        });
    }
    group.finish();
}

/// Benchmark the cost of taking a snapshot.
fn bench_begin_read(c: &mut Criterion) {
    let db = populated(100_000);
    c.bench_function("begin_read", |b| {
        b.iter(|| {
            let tx = db.begin(false).unwrap();
            black_box(tx.id());
        });
    });
}

criterion_group!(benches, bench_set, bench_get, bench_ascend, bench_begin_read);
criterion_main!(benches);
