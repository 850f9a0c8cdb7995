//! Benchmarks for the snapshot and mutation hot paths.
//!
//! Run with: cargo bench -p glasshouse-core

use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use glasshouse_core::{Node, Snap, Store, Value};
use std::hint::black_box;

/// Build a record with `width` integer fields and one nested child per
/// four fields, so rebuilds exercise both scalar copying and
/// child-snapshot reuse.
fn make_state(store: &Store, width: usize) -> Node {
    let mut entries: Vec<(String, Value)> = Vec::with_capacity(width);
    for i in 0..width {
        if i % 4 == 0 {
            entries.push((
                format!("child{i}"),
                Value::record([("x", Value::Int(i as i64))]),
            ));
        } else {
            entries.push((format!("k{i}"), Value::Int(i as i64)));
        }
    }
    store.wrap(Value::record(entries)).unwrap()
}

fn bench_snapshot_cache_hit(c: &mut Criterion) {
    let mut group = c.benchmark_group("snapshot/cache_hit");
    for width in [8, 64, 256] {
        let store = Store::new();
        let node = make_state(&store, width);
        let _warm = node.snapshot();
        group.bench_with_input(BenchmarkId::from_parameter(width), &node, |b, node| {
            b.iter(|| black_box(node.snapshot()))
        });
    }
    group.finish();
}

fn bench_snapshot_rebuild(c: &mut Criterion) {
    let mut group = c.benchmark_group("snapshot/rebuild");
    for width in [8, 64, 256] {
        let store = Store::new();
        let node = make_state(&store, width);
        let mut i = 0i64;
        group.bench_with_input(BenchmarkId::from_parameter(width), &node, |b, node| {
            b.iter(|| {
                i += 1;
                node.set("k1", i);
                black_box(node.snapshot())
            })
        });
    }
    group.finish();
}

fn bench_write_throughput(c: &mut Criterion) {
    let store = Store::new();
    let node = make_state(&store, 64);
    let mut i = 0i64;
    c.bench_function("node/set_scalar", |b| {
        b.iter(|| {
            i += 1;
            node.set("k1", black_box(i));
        })
    });

    let mut j = 0i64;
    let subscribed = make_state(&store, 64);
    let _sub = subscribed.subscribe(|_| {});
    c.bench_function("node/set_scalar_subscribed", |b| {
        b.iter(|| {
            j += 1;
            subscribed.set("k1", black_box(j));
            store.flush();
        })
    });
}

criterion_group!(
    benches,
    bench_snapshot_cache_hit,
    bench_snapshot_rebuild,
    bench_write_throughput
);
criterion_main!(benches);
