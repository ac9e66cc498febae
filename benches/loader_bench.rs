//! Benchmarks for loading, resampling and group expansion.

#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::cast_precision_loss,
    missing_docs
)]

use std::sync::Arc;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use equitune::{
    resample::resample_indices, ArrowImageDataset, DataLoader, Group, Image, ImageBatch,
    ResamplePolicy,
};

fn create_dataset(rows: usize, side: usize) -> ArrowImageDataset {
    let images: Vec<Image> = (0..rows)
        .map(|i| Image::from_vec(vec![i as f32; 3 * side * side], [3, side, side]).expect("image"))
        .collect();
    // one large class, the rest spread over nine
    let labels: Vec<usize> = (0..rows).map(|i| if i % 2 == 0 { 0 } else { 1 + i % 9 }).collect();
    ArrowImageDataset::from_images(&images, &labels).expect("Failed to create dataset")
}

fn bench_resample(c: &mut Criterion) {
    let mut group = c.benchmark_group("resample");

    for size in [1_000, 10_000, 100_000].iter() {
        let labels: Vec<usize> = (0..*size).map(|i| if i % 2 == 0 { 0 } else { 1 + i % 9 }).collect();
        group.throughput(Throughput::Elements(*size as u64));
        for policy in [ResamplePolicy::Oversample, ResamplePolicy::Undersample] {
            group.bench_with_input(
                BenchmarkId::new(policy.as_str(), size),
                &labels,
                |b, labels| b.iter(|| resample_indices(black_box(labels), policy, 42).unwrap()),
            );
        }
    }
    group.finish();
}

fn bench_dataloader(c: &mut Criterion) {
    let mut group = c.benchmark_group("dataloader");
    let dataset = Arc::new(create_dataset(2_048, 28));
    group.throughput(Throughput::Elements(2_048));

    for workers in [0, 2, 4].iter() {
        let loader = DataLoader::from_arc(Arc::clone(&dataset))
            .batch_size(64)
            .shuffle(true)
            .seed(7)
            .num_workers(*workers);
        group.bench_with_input(BenchmarkId::new("workers", workers), &loader, |b, loader| {
            b.iter(|| {
                let mut count = 0;
                for batch in loader.iter() {
                    count += black_box(batch.unwrap()).len();
                }
                count
            });
        });
    }
    group.finish();
}

fn bench_group_expansion(c: &mut Criterion) {
    let mut group = c.benchmark_group("group_expansion");
    let images: Vec<Image> = (0..32)
        .map(|i| Image::from_vec(vec![i as f32; 3 * 64 * 64], [3, 64, 64]).unwrap())
        .collect();
    let batch = ImageBatch::from_images(&images).unwrap();

    for g in [Group::Rot90, Group::Flip] {
        group.bench_function(g.as_str(), |b| {
            b.iter(|| g.transform_batch(black_box(&batch)).unwrap());
        });
    }
    group.finish();
}

criterion_group!(benches, bench_resample, bench_dataloader, bench_group_expansion);
criterion_main!(benches);
