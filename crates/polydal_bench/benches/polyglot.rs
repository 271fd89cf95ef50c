//! Polyglot coordinator benchmarks.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use polydal_core::{Entity, OrderBy};
use polydal_testkit::{user, TestStores, USER};
use polydal_value::Value;

fn populated(count: usize) -> TestStores {
    let stores = TestStores::new();
    for i in 0..count {
        stores.map.insert(&user(&format!("user{i}"), Some((i % 90) as i64))).unwrap();
    }
    stores
}

/// Benchmark inserting one logical user (one row plus one entry).
fn bench_insert(c: &mut Criterion) {
    c.bench_function("polyglot_insert", |b| {
        let stores = TestStores::new();
        let mut n = 0u64;
        b.iter(|| {
            n += 1;
            black_box(stores.map.insert(&user(&format!("u{n}"), None)).unwrap());
        });
    });
}

/// Benchmark lookup by the SQL key, correlating the directory entry.
fn bench_get_by_id(c: &mut Criterion) {
    let stores = populated(100);
    let template = Entity::with_values(&USER, [("id", Value::Integer(50))]).unwrap();

    c.bench_function("polyglot_get_by_id", |b| {
        b.iter(|| black_box(stores.map.get_by_id(black_box(&template)).unwrap()));
    });
}

/// Benchmark the inner join over a populated pair of stores.
fn bench_join(c: &mut Criterion) {
    let mut group = c.benchmark_group("polyglot_join");

    for count in [10usize, 100].iter() {
        group.throughput(Throughput::Elements(*count as u64));
        group.bench_with_input(BenchmarkId::from_parameter(count), count, |b, &count| {
            let stores = populated(count);
            let all = Entity::new(&USER);

            b.iter(|| {
                let joined = stores.map.get_by_template(&all, &[OrderBy::asc("age")]).unwrap();
                black_box(joined);
            });
        });
    }
    group.finish();
}

/// Benchmark a selective join; the cheapest side drives the probes.
fn bench_selective_join(c: &mut Criterion) {
    let stores = populated(100);
    let template = Entity::with_values(&USER, [("age", 42)]).unwrap();

    c.bench_function("polyglot_selective_join", |b| {
        b.iter(|| black_box(stores.map.get_by_template(black_box(&template), &[]).unwrap()));
    });
}

criterion_group!(benches, bench_insert, bench_get_by_id, bench_join, bench_selective_join);

criterion_main!(benches);
