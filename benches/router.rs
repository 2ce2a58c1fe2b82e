use std::sync::Arc;
use std::time::Instant;

use criterion::{criterion_group, criterion_main, Criterion, Throughput};
use serde_json::json;

use tagrace::storage::{open_store, InMemoryCounterStore, PersistentConfig};
use tagrace::{render, CounterStore, EventRouter, KeywordSet, Tally};

const KEYWORDS: [&str; 4] = ["rust", "go", "zig", "odin"];

fn make_tally() -> Tally {
    Tally::new(Arc::new(KeywordSet::new(KEYWORDS).unwrap()))
}

fn make_events(n: u64) -> Vec<Vec<u8>> {
    (0..n)
        .map(|id| {
            // every fifth event mentions nothing tracked
            let tag = KEYWORDS.get((id % 5) as usize).copied().unwrap_or("java");
            serde_json::to_vec(&json!({
                "id": id,
                "id_str": id.to_string(),
                "text": format!("event {id} #{tag}"),
                "user": { "id": 7, "name": "Ferris", "screen_name": "ferris" },
                "entities": { "hashtags": [{ "text": tag }] }
            }))
            .unwrap()
        })
        .collect()
}

fn bench_route_in_memory(c: &mut Criterion) {
    let events = make_events(1024);
    let mut group = c.benchmark_group("router");
    group.throughput(Throughput::Elements(1));

    group.bench_function("in_memory", |b| {
        b.iter_custom(|iters| {
            // Fresh state per sample so the store does not grow across samples.
            let store: Arc<dyn CounterStore> = Arc::new(InMemoryCounterStore::new());
            let mut router = EventRouter::new(make_tally(), store);

            let start = Instant::now();
            for i in 0..iters {
                router.process(&events[(i % 1024) as usize]);
            }
            start.elapsed()
        })
    });
    group.finish();
}

fn bench_route_persistent(c: &mut Criterion) {
    let events = make_events(1024);
    let mut group = c.benchmark_group("router");
    group.throughput(Throughput::Elements(1));

    group.bench_function("persistent_no_fsync", |b| {
        b.iter_custom(|iters| {
            let dir = tempfile::tempdir().unwrap();
            let cfg = PersistentConfig {
                sync_on_write: false,
                ..PersistentConfig::default()
            };
            let store = Arc::new(open_store(dir.path(), Some(cfg)).unwrap());
            let mut router = EventRouter::new(make_tally(), store.clone());

            let start = Instant::now();
            for i in 0..iters {
                router.process(&events[(i % 1024) as usize]);
            }
            let elapsed = start.elapsed();
            store.close().unwrap();
            elapsed
        })
    });
    group.finish();
}

fn bench_render(c: &mut Criterion) {
    let mut tally = make_tally();
    for (i, keyword) in KEYWORDS.iter().enumerate() {
        for _ in 0..=i * 10 {
            tally.increment(keyword).unwrap();
        }
    }

    c.bench_function("render/colored_table", |b| b.iter(|| render(&tally, true)));
}

criterion_group!(
    router,
    bench_route_in_memory,
    bench_route_persistent,
    bench_render
);
criterion_main!(router);
