use std::hint::black_box;

use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use kfmatch::matcher::{find_closest, rank, squared_l2};
use kfmatch::{Embedding, GalleryIndex};
use rand::prelude::*;

fn random_embedding(rng: &mut impl Rng, dim: usize) -> Embedding {
    (0..dim).map(|_| rng.random_range(-1.0..1.0)).collect()
}

fn random_gallery(rng: &mut impl Rng, n: usize, dim: usize) -> GalleryIndex {
    let identifiers = (0..n).map(|i| format!("frame_{i:06}.jpg")).collect();
    let embeddings = (0..n).map(|_| random_embedding(rng, dim)).collect();
    GalleryIndex::from_embeddings(identifiers, embeddings).unwrap()
}

fn bench_squared_l2(c: &mut Criterion) {
    let mut group = c.benchmark_group("SquaredL2");
    let mut rng = rand::rng();
    for dim in [512, 2304] {
        let a = random_embedding(&mut rng, dim);
        let b = random_embedding(&mut rng, dim);
        group.throughput(Throughput::Elements(dim as u64));
        group.bench_with_input(BenchmarkId::from_parameter(dim), &dim, |bench, _| {
            bench.iter(|| squared_l2(black_box(&a), black_box(&b)))
        });
    }
    group.finish();
}

fn bench_scan(c: &mut Criterion) {
    let mut group = c.benchmark_group("Scan");
    let mut rng = rand::rng();
    // 32x24 的缩略图特征
    let dim = 2304;
    for n in [100, 1000, 5000] {
        let gallery = random_gallery(&mut rng, n, dim);
        let query = random_embedding(&mut rng, dim);
        group.throughput(Throughput::Elements(n as u64));
        group.bench_with_input(BenchmarkId::new("find_closest", n), &n, |bench, _| {
            bench.iter(|| find_closest(black_box(&query), &gallery).unwrap())
        });
        group.bench_with_input(BenchmarkId::new("rank_10", n), &n, |bench, _| {
            bench.iter(|| rank(black_box(&query), &gallery, 10).unwrap())
        });
    }
    group.finish();
}

criterion_group!(benches, bench_squared_l2, bench_scan);
criterion_main!(benches);
