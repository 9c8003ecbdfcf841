use std::hint::black_box;

use chrono::{TimeZone, Utc};
use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use hybrid_search::{AppConfig, SearchRequest, SearchStack};
use index::{LexicalHit, SearchableItem, VectorMatch};
use matcher::merge_candidates;
use tokio::runtime::Runtime;

const TOPICS: &[&str] = &["clutch", "ace", "speedrun", "boss", "headshot", "comeback"];

fn runtime() -> Runtime {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .expect("tokio runtime")
}

/// Stack with the stub provider and `count` embedded items.
fn populated_stack(rt: &Runtime, count: usize) -> SearchStack {
    let mut config = AppConfig::default();
    // Benches measure the query path, not provider deadlines.
    config.embedding.query_timeout_ms = 5_000;
    let stack = SearchStack::builder(config).build().expect("stack builds");
    rt.block_on(async {
        stack.ensure_serving().await.expect("index serving");
        for n in 0..count {
            let topic = TOPICS[n % TOPICS.len()];
            let other = TOPICS[(n / TOPICS.len()) % TOPICS.len()];
            let item = SearchableItem::new(
                format!("clip-{n:06}"),
                format!("Ranked {topic} {other} highlight {n}"),
                Utc.timestamp_opt(1_700_000_000 + n as i64 * 60, 0).unwrap(),
            )
            .with_category(if n % 3 == 0 { "fps" } else { "moba" });
            stack.indexer.upsert(item).await.expect("upsert");
        }
    });
    stack
}

fn bench_query_path(c: &mut Criterion) {
    let rt = runtime();
    let mut group = c.benchmark_group("search");

    for &count in &[1_000usize, 10_000] {
        let stack = populated_stack(&rt, count);
        group.throughput(Throughput::Elements(1));

        group.bench_with_input(BenchmarkId::new("warm_cache", count), &stack, |b, stack| {
            let request = SearchRequest::new("clutch highlight").with_limit(20);
            b.iter(|| {
                let resp = rt.block_on(stack.searcher.search(black_box(&request)));
                black_box(resp.expect("search"))
            });
        });

        group.bench_with_input(BenchmarkId::new("cold_candidates", count), &stack, |b, stack| {
            let mut n = 0u64;
            b.iter(|| {
                // A fresh query text misses every cache layer.
                n += 1;
                let request = SearchRequest::new(format!("ace boss {n}")).with_limit(20);
                let resp = rt.block_on(stack.searcher.search(&request));
                black_box(resp.expect("search"))
            });
        });
    }

    group.finish();
}

fn bench_merge(c: &mut Criterion) {
    let mut group = c.benchmark_group("merge_candidates");
    for &width in &[100usize, 500] {
        let lexical: Vec<LexicalHit> = (0..width)
            .map(|i| LexicalHit {
                id: format!("c{i:04}"),
                score: (width - i) as f32,
                created_at: None,
            })
            .collect();
        // Two thirds of the candidates carry a vector.
        let ranked: Vec<VectorMatch> = (0..width)
            .filter(|i| i % 3 != 0)
            .map(|i| VectorMatch {
                id: format!("c{i:04}"),
                similarity: ((i * 7919) % 1000) as f32 / 1000.0,
            })
            .collect();

        group.throughput(Throughput::Elements(width as u64));
        group.bench_with_input(BenchmarkId::from_parameter(width), &width, |b, _| {
            b.iter(|| black_box(merge_candidates(black_box(&lexical), Some(black_box(&ranked)))));
        });
    }
    group.finish();
}

criterion_group!(benches, bench_query_path, bench_merge);
criterion_main!(benches);
