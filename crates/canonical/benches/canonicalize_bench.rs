use canonical::{cache_key, canonicalize, canonicalize_query, CanonicalizeConfig};
use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};

fn bench_canonicalize(c: &mut Criterion) {
    let config = CanonicalizeConfig::default();
    let mut group = c.benchmark_group("canonicalize");

    for size in [64, 512, 4096].iter() {
        let text = "Word ".repeat(*size / 5);
        group.throughput(Throughput::Bytes(text.len() as u64));
        group.bench_function(format!("bytes_{size}"), |b| {
            b.iter(|| canonicalize(black_box(&text), black_box(&config)).expect("canonicalize"))
        });
    }

    group.finish();
}

fn bench_query_key(c: &mut Criterion) {
    let config = CanonicalizeConfig::default();
    c.bench_function("query_cache_key", |b| {
        b.iter(|| {
            let q = canonicalize_query(black_box("  Funny VALORANT clutch "), &config)
                .expect("query");
            cache_key("query", "stub-v1", &q.text)
        })
    });
}

criterion_group!(benches, bench_canonicalize, bench_query_key);
criterion_main!(benches);
