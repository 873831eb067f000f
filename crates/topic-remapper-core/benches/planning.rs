//! Performance benchmarks for remapping plans.
//!
//! Measures consistency checking and planning over topics of growing size.

use std::collections::BTreeSet;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

use topic_remapper_core::mapping::{self, MappingSnapshot, Planner};
use topic_remapper_core::testing::static_topic;

fn broker_names(count: usize) -> Vec<String> {
    (0..count).map(|i| format!("broker-{i:03}")).collect()
}

/// `queues` logical queues spread round-robin over `brokers` brokers.
fn snapshot(queues: usize, brokers: usize) -> MappingSnapshot {
    let names = broker_names(brokers);
    let leaders: Vec<&str> = (0..queues).map(|q| names[q % brokers].as_str()).collect();
    static_topic("bench", 1, &leaders, 1_000_000)
}

fn bench_check(c: &mut Criterion) {
    let mut group = c.benchmark_group("check");

    for (queues, brokers) in [(16, 4), (256, 16), (4096, 64)] {
        let snapshot = snapshot(queues, brokers);

        group.throughput(Throughput::Elements(queues as u64));
        group.bench_with_input(
            BenchmarkId::new("consistent", format!("{queues}:{brokers}")),
            &snapshot,
            |b, s| {
                b.iter(|| black_box(mapping::check("bench", &s.brokers).unwrap()));
            },
        );
    }

    group.finish();
}

fn bench_plan(c: &mut Criterion) {
    let mut group = c.benchmark_group("plan");
    let planner = Planner::default();

    for (queues, brokers) in [(16, 4), (256, 16), (4096, 64)] {
        let snapshot = snapshot(queues, brokers);

        // Drain the first half of the brokers onto the second half plus as
        // many new ones.
        let targets: BTreeSet<String> = broker_names(brokers + brokers / 2)
            .into_iter()
            .skip(brokers / 2)
            .collect();

        group.throughput(Throughput::Elements(queues as u64));
        group.bench_with_input(
            BenchmarkId::new("drain_half", format!("{queues}:{brokers}")),
            &(snapshot, targets),
            |b, (s, t)| {
                b.iter(|| black_box(planner.plan("bench", s, t).unwrap()));
            },
        );
    }

    group.finish();
}

criterion_group!(benches, bench_check, bench_plan);
criterion_main!(benches);
