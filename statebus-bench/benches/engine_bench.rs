//! Transition engine benchmarks.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use statebus_core::{MachineSpec, PartitionAssignor, PartitionPolicy, PartitionRange};

fn order_spec() -> MachineSpec {
    serde_json::from_value(serde_json::json!({
        "states": ["created", "processing", "completed", "failed"],
        "events": ["START", "COMPLETE", "FAIL", "RETRY"],
        "transitions": {
            "created": {"START": "processing"},
            "processing": {"COMPLETE": "completed", "FAIL": "failed"},
            "failed": {"RETRY": "processing"}
        }
    }))
    .unwrap()
}

/// A chain state_0 -> state_1 -> ... with one event per step.
fn chain_spec(len: usize) -> MachineSpec {
    let mut spec = MachineSpec {
        states: (0..len).map(|i| format!("state_{}", i)).collect(),
        events: (0..len).map(|i| format!("NEXT_{}", i)).collect(),
        transitions: Default::default(),
    };
    for i in 0..len - 1 {
        spec.transitions
            .entry(format!("state_{}", i))
            .or_default()
            .insert(format!("NEXT_{}", i), format!("state_{}", i + 1));
    }
    spec
}

fn bench_compile(c: &mut Criterion) {
    let mut group = c.benchmark_group("engine_compile");

    let simple = order_spec();
    group.bench_function("simple", |b| {
        b.iter(|| black_box(simple.compile().unwrap()))
    });

    for len in [10, 100, 1000] {
        let spec = chain_spec(len);
        group.throughput(Throughput::Elements(len as u64));
        group.bench_with_input(BenchmarkId::new("chain", len), &spec, |b, spec| {
            b.iter(|| black_box(spec.compile().unwrap()))
        });
    }

    group.finish();
}

fn bench_apply(c: &mut Criterion) {
    let mut group = c.benchmark_group("engine_apply");
    let table = order_spec().compile().unwrap();

    group.throughput(Throughput::Elements(1));
    group.bench_function("accepted", |b| {
        b.iter(|| black_box(table.apply(black_box("processing"), black_box("FAIL"))))
    });
    group.bench_function("not_accepted", |b| {
        b.iter(|| black_box(table.apply(black_box("completed"), black_box("START"))))
    });

    let events = ["START", "FAIL", "RETRY", "FAIL", "RETRY", "COMPLETE"];
    group.throughput(Throughput::Elements(events.len() as u64));
    group.bench_function("run_sequence", |b| {
        b.iter(|| black_box(table.run(events.iter().copied())))
    });

    group.finish();
}

fn bench_fingerprint(c: &mut Criterion) {
    let spec = chain_spec(100);
    c.bench_function("engine_fingerprint_chain_100", |b| {
        b.iter(|| black_box(spec.fingerprint()))
    });
}

fn bench_assign(c: &mut Criterion) {
    let mut group = c.benchmark_group("partition_assign");
    for policy in [PartitionPolicy::Random, PartitionPolicy::Hashed] {
        let assignor = PartitionAssignor::new(PartitionRange::default(), policy);
        group.bench_with_input(
            BenchmarkId::from_parameter(format!("{:?}", policy)),
            &assignor,
            |b, assignor| b.iter(|| black_box(assignor.assign(black_box("order-definition")))),
        );
    }
    group.finish();
}

criterion_group!(benches, bench_compile, bench_apply, bench_fingerprint, bench_assign);
criterion_main!(benches);
