// SPDX-License-Identifier: MIT OR Apache-2.0
//! Benchmarks for the audit chain's per-event hashing cost: computing
//! `H(canonical(payload) || prevHash)` and re-verifying it, at growing
//! chain lengths. Exercises the same canonicalize-then-hash arithmetic
//! `AuditChain::append`/`AuditChain::verify` run per event, without a
//! database round trip.

use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};
use serde_json::json;
use sha2::{Digest, Sha256};

const GENESIS_HASH: &str = "0000000000000000000000000000000000000000000000000000000000000000";

fn event_payload(i: usize) -> serde_json::Value {
    json!({
        "eventType": "manifest.applied",
        "manifestId": format!("{i:08}-0000-0000-0000-000000000000"),
        "actor": "release-bot",
        "ts": i,
    })
}

fn next_hash(payload: &serde_json::Value, prev_hash: &str) -> String {
    let canonical = rok_canon::canonical_bytes(payload).unwrap();
    let mut hasher = Sha256::new();
    hasher.update(&canonical);
    hasher.update(prev_hash.as_bytes());
    hex::encode(hasher.finalize())
}

/// Build a chain of `len` hashes, each depending on the previous.
fn build_chain(len: usize) -> Vec<String> {
    let mut hashes = Vec::with_capacity(len);
    let mut prev = GENESIS_HASH.to_string();
    for i in 0..len {
        let hash = next_hash(&event_payload(i), &prev);
        hashes.push(hash.clone());
        prev = hash;
    }
    hashes
}

fn bench_append_one_event_at_chain_length(c: &mut Criterion) {
    let mut group = c.benchmark_group("audit_append_one_event_at_chain_length");

    for chain_len in [0, 100, 1_000, 10_000] {
        let chain = build_chain(chain_len);
        let prev_hash = chain.last().cloned().unwrap_or_else(|| GENESIS_HASH.to_string());
        let payload = event_payload(chain_len);
        group.bench_with_input(BenchmarkId::from_parameter(chain_len), &(payload, prev_hash), |b, (p, prev)| {
            b.iter(|| next_hash(black_box(p), black_box(prev)));
        });
    }

    group.finish();
}

fn bench_verify_chain_by_length(c: &mut Criterion) {
    let mut group = c.benchmark_group("audit_verify_chain_by_length");

    for chain_len in [10, 100, 1_000] {
        let events: Vec<(serde_json::Value, String, String)> = (0..chain_len)
            .scan(GENESIS_HASH.to_string(), |prev, i| {
                let payload = event_payload(i);
                let hash = next_hash(&payload, prev);
                let entry = (payload, prev.clone(), hash.clone());
                *prev = hash;
                Some(entry)
            })
            .collect();

        group.bench_with_input(BenchmarkId::from_parameter(chain_len), &events, |b, events| {
            b.iter(|| {
                for (payload, prev_hash, hash) in events {
                    let recomputed = next_hash(black_box(payload), black_box(prev_hash));
                    assert_eq!(&recomputed, hash);
                }
            });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_append_one_event_at_chain_length, bench_verify_chain_by_length);
criterion_main!(benches);
