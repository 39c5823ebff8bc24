// SPDX-License-Identifier: MIT OR Apache-2.0
//! Benchmarks for multisig quorum evaluation with varying approver-set and
//! approval-list sizes.

use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};

use rok_multisig::{Quorum, QuorumConfig};

fn make_approver_set(n: usize) -> Vec<String> {
    (0..n).map(|i| format!("approver-{i}")).collect()
}

fn bench_quorum_config_construction(c: &mut Criterion) {
    let mut group = c.benchmark_group("quorum_config_construction");

    for n in [5, 50, 500] {
        let approvers = make_approver_set(n);
        group.bench_with_input(BenchmarkId::from_parameter(n), &approvers, |b, approvers| {
            b.iter(|| QuorumConfig::new(black_box(approvers.clone()), n / 2));
        });
    }

    group.finish();
}

fn bench_is_authorized(c: &mut Criterion) {
    let mut group = c.benchmark_group("quorum_is_authorized");

    for n in [5, 50, 500] {
        let config = QuorumConfig::new(make_approver_set(n), n / 2);
        group.bench_with_input(BenchmarkId::new("hit", n), &config, |b, config| {
            b.iter(|| config.is_authorized(black_box("approver-0")));
        });
        group.bench_with_input(BenchmarkId::new("miss", n), &config, |b, config| {
            b.iter(|| config.is_authorized(black_box("not-an-approver")));
        });
    }

    group.finish();
}

fn bench_quorum_evaluate_by_approval_count(c: &mut Criterion) {
    let mut group = c.benchmark_group("quorum_evaluate_by_approval_count");

    for approval_count in [1, 10, 100, 1_000] {
        let approvers = make_approver_set(approval_count);
        group.bench_with_input(BenchmarkId::from_parameter(approval_count), &approvers, |b, approvers| {
            b.iter(|| Quorum::evaluate(black_box(approvers), approval_count / 2));
        });
    }

    group.finish();
}

fn bench_quorum_evaluate_with_duplicate_approvals(c: &mut Criterion) {
    let mut group = c.benchmark_group("quorum_evaluate_with_duplicates");

    for total_submissions in [10, 100, 1_000] {
        // Only five distinct approvers resubmitting, simulating retried
        // approvals landing in the same batch.
        let approvers: Vec<String> = (0..total_submissions).map(|i| format!("approver-{}", i % 5)).collect();
        group.bench_with_input(BenchmarkId::from_parameter(total_submissions), &approvers, |b, approvers| {
            b.iter(|| Quorum::evaluate(black_box(approvers), 3));
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_quorum_config_construction,
    bench_is_authorized,
    bench_quorum_evaluate_by_approval_count,
    bench_quorum_evaluate_with_duplicate_approvals,
);
criterion_main!(benches);
