use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};

use tally_core::{AggregateId, Envelope};
use tally_events::{AggregatorRegistry, HIT_POINTS_EVENT, HitPoints, JsonCodec, PayloadCodec};
use tally_infra::context::OperationContext;
use tally_infra::event_store::{EventStore, InMemoryKeyedStore};
use tokio::runtime::Runtime;

fn runtime() -> Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .build()
        .unwrap()
}

fn hit_points_event(id: &str, version: i64) -> Envelope {
    let payload = HitPoints {
        id: id.to_string(),
        character_name: "bench".to_string(),
        character_hit_points: if version % 3 == 0 { 5 } else { -1 },
        note: format!("event {version}"),
    };
    Envelope::new(id, version, HIT_POINTS_EVENT, JsonCodec.encode(&payload).unwrap())
}

/// Store with `history` events, a snapshot taken after all but the last `tail`.
fn seeded_store(rt: &Runtime, history: i64, tail: i64) -> (EventStore<InMemoryKeyedStore>, AggregateId) {
    let store = EventStore::new(InMemoryKeyedStore::new(), AggregatorRegistry::standard(JsonCodec));
    let id = AggregateId::new();
    let ctx = OperationContext::background();

    rt.block_on(async {
        for v in 0..history {
            store.append(&ctx, hit_points_event(id.as_str(), v)).await.unwrap();
            if v + 1 == history - tail {
                store.snapshot_current(&ctx, &id).await.unwrap();
            }
        }
    });
    (store, id)
}

fn bench_append_throughput(c: &mut Criterion) {
    let rt = runtime();
    let mut group = c.benchmark_group("append_throughput");

    for batch_size in [1i64, 10, 100].iter() {
        group.throughput(Throughput::Elements(*batch_size as u64));
        group.bench_with_input(
            BenchmarkId::from_parameter(batch_size),
            batch_size,
            |b, &batch_size| {
                let events: Vec<Envelope> = (0..batch_size)
                    .map(|v| hit_points_event("append-bench", v))
                    .collect();
                b.iter(|| {
                    let store = EventStore::new(
                        InMemoryKeyedStore::new(),
                        AggregatorRegistry::standard(JsonCodec),
                    );
                    let ctx = OperationContext::background();
                    rt.block_on(async {
                        for event in events.iter().cloned() {
                            store.append(&ctx, event).await.unwrap();
                        }
                    });
                    black_box(store);
                });
            },
        );
    }
    group.finish();
}

fn bench_projection_full_replay_vs_snapshot(c: &mut Criterion) {
    let rt = runtime();
    let mut group = c.benchmark_group("projection_full_replay_vs_snapshot");
    let tail = 5;

    for history in [100i64, 1_000, 10_000].iter() {
        let (store, id) = seeded_store(&rt, *history, tail);
        let ctx = OperationContext::background();

        group.bench_with_input(BenchmarkId::new("full_replay", history), history, |b, _| {
            b.iter(|| {
                let projected = rt
                    .block_on(store.project_from_beginning(&ctx, &id))
                    .unwrap();
                black_box(projected)
            });
        });

        group.bench_with_input(BenchmarkId::new("from_snapshot", history), history, |b, _| {
            b.iter(|| {
                let projected = rt.block_on(store.project(&ctx, &id)).unwrap();
                black_box(projected)
            });
        });
    }
    group.finish();
}

criterion_group!(
    benches,
    bench_append_throughput,
    bench_projection_full_replay_vs_snapshot
);
criterion_main!(benches);
