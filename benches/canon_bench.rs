// SPDX-License-Identifier: MIT OR Apache-2.0
//! Benchmarks for canonicalization and content hashing with varying payload
//! sizes and shapes.

use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};
use serde_json::json;

use rok_canon::{canonical_bytes, content_hash};

fn make_manifest_payload(target_count: usize) -> serde_json::Value {
    let targets: Vec<String> = (0..target_count).map(|i| format!("target-{i}")).collect();
    json!({
        "manifestId": "11111111-1111-1111-1111-111111111111",
        "packageId": "22222222-2222-2222-2222-222222222222",
        "target": {"targets": targets},
        "impact": "high",
        "rationale": "quarterly platform migration across every regional cell",
        "applyStrategy": {"strategy": "blue-green", "batchSize": 50},
    })
}

fn make_deeply_nested_payload(depth: usize) -> serde_json::Value {
    let mut value = json!({"leaf": "value", "count": 42});
    for i in 0..depth {
        value = json!({format!("level{i}"): value, "sibling": i});
    }
    value
}

fn bench_canonical_bytes_by_target_count(c: &mut Criterion) {
    let mut group = c.benchmark_group("canonical_bytes_by_target_count");

    for count in [1, 10, 100, 1000] {
        let payload = make_manifest_payload(count);
        group.throughput(Throughput::Bytes(payload.to_string().len() as u64));
        group.bench_with_input(BenchmarkId::from_parameter(count), &payload, |b, p| {
            b.iter(|| canonical_bytes(black_box(p)).unwrap());
        });
    }

    group.finish();
}

fn bench_content_hash_by_target_count(c: &mut Criterion) {
    let mut group = c.benchmark_group("content_hash_by_target_count");

    for count in [1, 10, 100, 1000] {
        let payload = make_manifest_payload(count);
        group.bench_with_input(BenchmarkId::from_parameter(count), &payload, |b, p| {
            b.iter(|| content_hash(black_box(p)).unwrap());
        });
    }

    group.finish();
}

fn bench_content_hash_by_nesting_depth(c: &mut Criterion) {
    let mut group = c.benchmark_group("content_hash_by_nesting_depth");

    for depth in [1, 5, 20, 50] {
        let payload = make_deeply_nested_payload(depth);
        group.bench_with_input(BenchmarkId::from_parameter(depth), &payload, |b, p| {
            b.iter(|| content_hash(black_box(p)).unwrap());
        });
    }

    group.finish();
}

fn bench_content_hash_determinism(c: &mut Criterion) {
    let payload = make_manifest_payload(25);
    c.bench_function("content_hash_deterministic_25_targets", |b| {
        b.iter(|| {
            let h1 = content_hash(black_box(&payload)).unwrap();
            let h2 = content_hash(black_box(&payload)).unwrap();
            assert_eq!(h1, h2);
        });
    });
}

criterion_group!(
    benches,
    bench_canonical_bytes_by_target_count,
    bench_content_hash_by_target_count,
    bench_content_hash_by_nesting_depth,
    bench_content_hash_determinism,
);
criterion_main!(benches);
