use common::TransferId;
use criterion::{Criterion, criterion_group, criterion_main};
use event_store::{EventEnvelope, EventStore, InMemoryEventStore, Version};

fn make_event(transfer_id: TransferId, version: i64) -> EventEnvelope {
    EventEnvelope::builder()
        .transfer_id(transfer_id)
        .event_type("StatusChanged")
        .version(Version::new(version))
        .payload_raw(serde_json::json!({
            "type": "StatusChanged",
            "data": {"from": "assigned", "to": "picked_up"}
        }))
        .build()
        .unwrap()
}

fn bench_append_single_event(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();

    c.bench_function("event_store/append_single_event", |b| {
        b.iter(|| {
            rt.block_on(async {
                let store = InMemoryEventStore::new();
                store
                    .append(Version::initial(), vec![make_event(TransferId::new(), 1)])
                    .await
                    .unwrap();
            });
        });
    });
}

fn bench_load_stream(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let store = InMemoryEventStore::new();
    let transfer_id = TransferId::new();

    rt.block_on(async {
        let events: Vec<EventEnvelope> = (1..=50).map(|v| make_event(transfer_id, v)).collect();
        store.append(Version::initial(), events).await.unwrap();
    });

    c.bench_function("event_store/load_stream_50", |b| {
        b.iter(|| {
            rt.block_on(async {
                store.load_stream(transfer_id).await.unwrap();
            });
        });
    });
}

criterion_group!(benches, bench_append_single_event, bench_load_stream);
criterion_main!(benches);
