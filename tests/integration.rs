//! Integration tests for equitune.

#![allow(
    clippy::cast_possible_truncation,
    clippy::cast_precision_loss,
    clippy::uninlined_format_args
)]

use std::{collections::BTreeMap, sync::Arc};

use equitune::{
    build_balanced_loader,
    datasets::{get_ft_dataloader, isic2018, Preprocess},
    encoder::{HashedTextEncoder, LinearImageEncoder},
    prompts::get_labels_textprompts,
    ArrowImageDataset, ClassDistribution, Dataset, DatasetName, Error, FinetuneConfig, Finetuner,
    Image, JsonlTracker, MemoryTracker, Split, ZeroShotWeights,
};

/// A dataset of `counts[c]` constant images for each class `c`.
fn skewed_dataset(counts: &[usize]) -> ArrowImageDataset {
    let mut images = Vec::new();
    let mut labels = Vec::new();
    for (class, &count) in counts.iter().enumerate() {
        for i in 0..count {
            let value = class as f32 + i as f32 / 100.0;
            images.push(
                Image::from_vec(vec![value; 3 * 4 * 4], [3, 4, 4])
                    .unwrap_or_else(|e| panic!("image: {e}")),
            );
            labels.push(class);
        }
    }
    ArrowImageDataset::from_images(&images, &labels).unwrap_or_else(|e| panic!("dataset: {e}"))
}

fn offline_config() -> FinetuneConfig {
    FinetuneConfig {
        data_root: "/nonexistent".into(),
        image_size: 8,
        embed_dim: 16,
        batch_size: 16,
        num_workers: 2,
        ..FinetuneConfig::default()
    }
}

#[test]
fn test_oversampled_loader_end_to_end() {
    let dataset = Arc::new(skewed_dataset(&[20, 5, 2]));
    let loader = build_balanced_loader(dataset, "oversample", 7, 3)
        .unwrap_or_else(|e| panic!("loader: {e}"));
    assert_eq!(loader.len(), 60);

    let mut per_class: BTreeMap<usize, usize> = BTreeMap::new();
    let mut batches = 0;
    for batch in loader.iter() {
        let batch = batch.unwrap_or_else(|e| panic!("batch: {e}"));
        assert_eq!(batch.images.image_shape(), [3, 4, 4]);
        for &t in &batch.targets {
            *per_class.entry(t).or_default() += 1;
        }
        batches += 1;
    }
    assert_eq!(batches, 9);
    assert_eq!(per_class.values().copied().collect::<Vec<_>>(), vec![20, 20, 20]);
}

#[test]
fn test_undersampled_loader_reshuffles_between_passes() {
    let dataset = Arc::new(skewed_dataset(&[30, 30, 30, 10]));
    let loader = build_balanced_loader(dataset, "undersample", 40, 0)
        .unwrap_or_else(|e| panic!("loader: {e}"));
    assert!(ClassDistribution::from_labels(&loader.dataset().labels()).is_uniform());

    let first: Vec<usize> = loader.epoch_indices(0);
    let second: Vec<usize> = loader.epoch_indices(1);
    assert_ne!(first, second);
    let (mut a, mut b) = (first, second);
    a.sort_unstable();
    b.sort_unstable();
    assert_eq!(a, b);
}

#[test]
fn test_unsupported_policy_is_rejected() {
    let dataset = Arc::new(skewed_dataset(&[2, 1]));
    assert!(matches!(
        build_balanced_loader(dataset, "smote", 4, 0),
        Err(Error::UnsupportedPolicy { .. })
    ));
}

#[test]
fn test_worker_count_does_not_change_batches() {
    let dataset = Arc::new(
        isic2018::embedded(Split::Eval, Preprocess::clip(8).unwrap_or_else(|e| panic!("{e}")))
            .unwrap_or_else(|e| panic!("{e}")),
    );
    let collect = |workers: usize| -> Vec<Vec<usize>> {
        build_balanced_loader(Arc::clone(&dataset), "oversample", 5, workers)
            .unwrap_or_else(|e| panic!("{e}"))
            .iter()
            .map(|b| b.unwrap_or_else(|e| panic!("{e}")).targets)
            .collect()
    };
    let serial = collect(0);
    assert_eq!(serial, collect(1));
    assert_eq!(serial, collect(4));
}

#[test]
fn test_finetune_runs_exact_iterations_across_passes() {
    let config = FinetuneConfig {
        num_iterations: 12,
        iter_print_freq: 5,
        ..offline_config()
    };
    let resolved = config.validate().unwrap_or_else(|e| panic!("{e}"));
    let (train, eval) = get_ft_dataloader(&config).unwrap_or_else(|e| panic!("{e}"));
    // 80 embedded MNIST digits in batches of 16
    assert_eq!(train.num_batches(), 5);

    let text = HashedTextEncoder::new(config.embed_dim, config.seed);
    let zeroshot = ZeroShotWeights::from_prompts(&text, &get_labels_textprompts(resolved.dataset))
        .unwrap_or_else(|e| panic!("{e}"));
    let encoder = LinearImageEncoder::new([3, 8, 8], config.embed_dim, config.seed);
    let mut finetuner =
        Finetuner::from_config(encoder, &zeroshot, &config).unwrap_or_else(|e| panic!("{e}"));

    let dir = tempfile::tempdir().unwrap_or_else(|e| panic!("{e}"));
    let path = dir.path().join("loss.jsonl");
    let mut tracker = JsonlTracker::create(&path).unwrap_or_else(|e| panic!("{e}"));
    let report = finetuner
        .run(&train, config.num_iterations, config.iter_print_freq, &mut tracker)
        .unwrap_or_else(|e| panic!("{e}"));
    drop(tracker);

    assert_eq!(report.steps, 12);
    assert_eq!(report.passes, 3);
    assert!(report.losses.iter().all(|l| l.is_finite()));

    let records = JsonlTracker::read_records(&path).unwrap_or_else(|e| panic!("{e}"));
    let steps: Vec<u64> = records.iter().map(|r| r.step).collect();
    assert_eq!(steps, (0..12).collect::<Vec<u64>>());
    assert!(records.iter().all(|r| r.name == "loss"));

    let accuracy = finetuner.evaluate(&eval).unwrap_or_else(|e| panic!("{e}"));
    assert_eq!(accuracy.examples, 20);
    assert!(accuracy.top1 <= accuracy.top5);
}

#[test]
fn test_equizero_and_flip_group_offline() {
    let config = FinetuneConfig {
        dataset_name: "CIFAR100".to_string(),
        group_name: "flip".to_string(),
        method: "equizero".to_string(),
        data_transformations: "rot90".to_string(),
        optimizer: "adamw".to_string(),
        num_iterations: 2,
        num_workers: 0,
        ..offline_config()
    };
    let (train, _) = get_ft_dataloader(&config).unwrap_or_else(|e| panic!("{e}"));
    let zeroshot = ZeroShotWeights::from_prompts(
        &HashedTextEncoder::new(config.embed_dim, 1),
        &get_labels_textprompts(DatasetName::Cifar100),
    )
    .unwrap_or_else(|e| panic!("{e}"));
    let encoder = LinearImageEncoder::new([3, 8, 8], config.embed_dim, 1);
    let mut finetuner =
        Finetuner::from_config(encoder, &zeroshot, &config).unwrap_or_else(|e| panic!("{e}"));
    let mut tracker = MemoryTracker::new();
    let report = finetuner
        .run(&train, 2, 1, &mut tracker)
        .unwrap_or_else(|e| panic!("{e}"));
    assert_eq!(report.steps, 2);
    assert_eq!(tracker.values("loss").len(), 2);
}

#[test]
fn test_unknown_selectors_fail_fast() {
    for (field, config) in [
        (
            "dataset",
            FinetuneConfig {
                dataset_name: "SVHN".to_string(),
                ..offline_config()
            },
        ),
        (
            "device",
            FinetuneConfig {
                device: "cuda:0".to_string(),
                ..offline_config()
            },
        ),
        (
            "method",
            FinetuneConfig {
                method: "majority".to_string(),
                ..offline_config()
            },
        ),
    ] {
        assert!(get_ft_dataloader(&config).is_err(), "{field} accepted");
    }
}
