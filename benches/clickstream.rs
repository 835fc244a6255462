use std::io::Write;

use clickstream_stats::{run, Query, TableStore, Tier};
use criterion::{black_box, criterion_group, criterion_main, Criterion};

const ROWS: usize = 200_000;

/// Write a synthetic clickstream so the benchmark needs no external data
fn synthetic_clickstream(path: &std::path::Path) {
    let mut out = std::io::BufWriter::new(std::fs::File::create(path).unwrap());
    let referrers = ["link", "external", "other"];
    for i in 0..ROWS {
        let coming_from = if i % 7 == 0 { "other-search".to_string() } else { format!("Page_{}", i % 5000) };
        writeln!(out, "{}\tArticle_{}\t{}\t{}", coming_from, i % 800, referrers[i % 3], 10 + i % 991).unwrap();
    }
}

fn benchmark_top_links(c: &mut Criterion) {
    let dir = tempfile::tempdir().unwrap();
    let data = dir.path().join("clickstream_data.tsv");
    synthetic_clickstream(&data);
    let store = TableStore::open(dir.path().join("store")).unwrap();

    c.bench_function("top_links_eager", |b| {
        b.iter(|| black_box(run(black_box(&data), Tier::Eager, &Query::TopLinks, None).unwrap()))
    });

    c.bench_function("top_links_chunked", |b| {
        b.iter(|| black_box(run(black_box(&data), Tier::Chunked, &Query::TopLinks, Some(&store)).unwrap()))
    });

    c.bench_function("summed_articles_chunked", |b| {
        b.iter(|| black_box(run(black_box(&data), Tier::Chunked, &Query::SummedArticles, None).unwrap()))
    });
}

criterion_group!(benches, benchmark_top_links);
criterion_main!(benches);
