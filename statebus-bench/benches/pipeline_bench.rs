//! Envelope codec and consumption pipeline benchmarks.

use bytes::Bytes;
use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use statebus_bus::Record;
use statebus_core::{Definition, MachineSpec};
use statebus_protocol::Envelope;
use statebus_server::{EventPipeline, IoPolicy, TableCache};
use statebus_storage::{DefinitionStore, MemoryDefinitionStore, MemoryStateCache};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Runtime;

static INSTANCE_COUNTER: AtomicU64 = AtomicU64::new(0);

fn toggle_definition() -> Definition {
    let spec: MachineSpec = serde_json::from_value(serde_json::json!({
        "states": ["off", "on"],
        "events": ["flip"],
        "transitions": {"off": {"flip": "on"}, "on": {"flip": "off"}}
    }))
    .unwrap();
    Definition {
        id: "toggle".into(),
        name: "toggle".into(),
        spec,
        partition: 0,
    }
}

fn record(offset: u64, payload: Bytes) -> Record {
    Record {
        topic: "bench".into(),
        partition: 0,
        offset,
        key: "k".into(),
        payload,
        timestamp: 0,
    }
}

fn bench_envelope(c: &mut Criterion) {
    let mut group = c.benchmark_group("envelope");
    let envelope = Envelope::new("toggle", "instance-0001", "flip");
    let encoded = envelope.encode().unwrap();

    group.throughput(Throughput::Bytes(encoded.len() as u64));
    group.bench_function("encode", |b| b.iter(|| black_box(envelope.encode().unwrap())));
    group.bench_function("decode", |b| {
        b.iter(|| black_box(Envelope::decode(black_box(&encoded)).unwrap()))
    });
    group.finish();
}

fn bench_pipeline(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let store = Arc::new(MemoryDefinitionStore::new());
    let cache = Arc::new(MemoryStateCache::new());
    rt.block_on(store.insert_if_absent(&toggle_definition()))
        .unwrap();

    let pipeline = EventPipeline::new(
        store,
        cache,
        Arc::new(TableCache::new()),
        IoPolicy::new(Duration::from_secs(1)),
    );

    let mut group = c.benchmark_group("pipeline_handle");
    group.throughput(Throughput::Elements(1));

    // Same instance every time: warm cache entry.
    let hot = record(0, Envelope::new("toggle", "hot", "flip").encode().unwrap());
    group.bench_function("same_instance", |b| {
        b.to_async(&rt)
            .iter(|| async { black_box(pipeline.handle(&hot).await.unwrap()) })
    });

    group.bench_function("new_instance", |b| {
        b.to_async(&rt).iter(|| async {
            let id = INSTANCE_COUNTER.fetch_add(1, Ordering::Relaxed);
            let payload = Envelope::new("toggle", format!("inst-{}", id), "flip")
                .encode()
                .unwrap();
            black_box(pipeline.handle(&record(id, payload)).await.unwrap())
        })
    });

    group.finish();
}

criterion_group!(benches, bench_envelope, bench_pipeline);
criterion_main!(benches);
