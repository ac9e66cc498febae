//! Class-balanced loader construction.
//!
//! Resamples a labeled dataset so every class appears equally often and wraps
//! the result in a shuffling [`DataLoader`]. The parent dataset is shared,
//! never copied or mutated.

use std::sync::Arc;

use tracing::info;

use crate::{
    dataloader::{DataLoader, DataLoaderBuilder},
    dataset::{Dataset, Subset},
    error::{Error, Result},
    imbalance::ImbalanceDetector,
    resample::{resample_indices, ResamplePolicy, BALANCE_SEED},
};

/// Builds a shuffling loader over a class-balanced view of `dataset`.
///
/// `policy` is `"oversample"` or `"undersample"`. The resampled index
/// sequence is computed once with [`BALANCE_SEED`] and reused for every pass;
/// only the per-pass shuffle changes.
///
/// # Errors
///
/// - [`Error::UnsupportedPolicy`] for any other policy name
/// - [`Error::EmptyDataset`] if `dataset` has no examples
/// - [`Error::InvalidConfig`] if `batch_size` is zero
///
/// # Example
///
/// ```
/// use std::sync::Arc;
/// use equitune::{
///     balanced::build_balanced_loader,
///     datasets::{isic2018, Preprocess, Split},
/// };
///
/// # fn main() -> equitune::Result<()> {
/// let dataset = Arc::new(isic2018::embedded(Split::Train, Preprocess::clip(8)?)?);
/// let loader = build_balanced_loader(dataset, "oversample", 32, 2)?;
/// for batch in loader.iter() {
///     assert!(!batch?.is_empty());
/// }
/// # Ok(())
/// # }
/// ```
pub fn build_balanced_loader<D: Dataset + 'static>(
    dataset: Arc<D>,
    policy: &str,
    batch_size: usize,
    num_workers: usize,
) -> Result<DataLoader<Subset<D>>> {
    let policy: ResamplePolicy = policy.parse()?;
    balanced_loader(dataset, policy, batch_size, num_workers, BALANCE_SEED)
}

/// Typed variant of [`build_balanced_loader`] with an explicit seed.
///
/// The seed drives both resampling and the per-pass shuffle.
///
/// # Errors
///
/// Same as [`build_balanced_loader`], minus policy parsing.
pub fn balanced_loader<D: Dataset + 'static>(
    dataset: Arc<D>,
    policy: ResamplePolicy,
    batch_size: usize,
    num_workers: usize,
    seed: u64,
) -> Result<DataLoader<Subset<D>>> {
    if batch_size == 0 {
        return Err(Error::invalid_config("batch_size must be greater than 0"));
    }
    let subset = balanced_subset(dataset, policy, seed)?;

    DataLoaderBuilder::new()
        .batch_size(batch_size)
        .shuffle(true)
        .seed(seed)
        .num_workers(num_workers)
        .build(subset)
}

/// Resamples `dataset` into a [`Subset`] with a uniform class distribution.
///
/// # Errors
///
/// Returns [`Error::EmptyDataset`] if `dataset` has no examples.
pub fn balanced_subset<D: Dataset>(
    dataset: Arc<D>,
    policy: ResamplePolicy,
    seed: u64,
) -> Result<Subset<D>> {
    let labels = dataset.try_labels()?;
    if labels.is_empty() {
        return Err(Error::EmptyDataset);
    }

    let before = ImbalanceDetector::analyze_labels(&labels);
    info!(
        policy = %policy,
        examples = before.distribution.total,
        classes = before.distribution.num_classes(),
        ratio = before.metrics.imbalance_ratio,
        "class distribution before resampling: {:?}",
        before.distribution.counts
    );

    let indices = resample_indices(&labels, policy, seed)?;
    let resampled: Vec<usize> = indices.iter().map(|&i| labels[i]).collect();
    let after = ImbalanceDetector::analyze_labels(&resampled);
    info!(
        examples = after.distribution.total,
        "class distribution after resampling: {:?}",
        after.distribution.counts
    );

    Subset::new(dataset, indices)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::cast_precision_loss)]
mod tests {
    use std::collections::HashSet;

    use super::*;
    use crate::{
        dataset::{ArrowImageDataset, Sample},
        imbalance::ClassDistribution,
        parallel::Batch,
        tensor::Image,
    };

    // 3:1 skewed labels, pixel value == original index
    fn skewed_dataset() -> Arc<ArrowImageDataset> {
        let labels = vec![0, 0, 0, 1, 0, 0, 0, 1];
        let images: Vec<Image> = (0..labels.len())
            .map(|i| Image::from_vec(vec![i as f32], [1, 1, 1]).unwrap())
            .collect();
        Arc::new(ArrowImageDataset::from_images(&images, &labels).unwrap())
    }

    fn pass_targets(loader: &DataLoader<Subset<ArrowImageDataset>>) -> Vec<usize> {
        let batches: Vec<Batch> = loader.iter().collect::<Result<_>>().unwrap();
        batches.into_iter().flat_map(|b| b.targets).collect()
    }

    #[test]
    fn test_oversample_balances() {
        let loader = build_balanced_loader(skewed_dataset(), "oversample", 3, 0).unwrap();
        assert_eq!(loader.len(), 12);
        let dist = ClassDistribution::from_labels(&pass_targets(&loader));
        assert_eq!(dist.get_count(0), 6);
        assert_eq!(dist.get_count(1), 6);
    }

    #[test]
    fn test_undersample_balances() {
        let loader = build_balanced_loader(skewed_dataset(), "undersample", 4, 2).unwrap();
        assert_eq!(loader.len(), 4);
        let dist = ClassDistribution::from_labels(&pass_targets(&loader));
        assert!(dist.is_uniform());
        assert_eq!(dist.get_count(1), 2);
    }

    #[test]
    fn test_oversample_keeps_every_original() {
        let dataset = skewed_dataset();
        let subset = balanced_subset(Arc::clone(&dataset), ResamplePolicy::Oversample, 42).unwrap();
        let seen: HashSet<usize> = subset.indices().iter().copied().collect();
        assert_eq!(seen.len(), dataset.len());
    }

    #[test]
    fn test_resampled_indices_are_reproducible() {
        let a = balanced_subset(skewed_dataset(), ResamplePolicy::Oversample, BALANCE_SEED).unwrap();
        let b = balanced_subset(skewed_dataset(), ResamplePolicy::Oversample, BALANCE_SEED).unwrap();
        assert_eq!(a.indices(), b.indices());
    }

    // index 1 has no label
    struct GappyDataset;

    impl Dataset for GappyDataset {
        fn len(&self) -> usize {
            4
        }

        fn get(&self, index: usize) -> Result<Sample> {
            let label = self.label(index).ok_or_else(|| Error::data("unlabeled"))?;
            Ok(Sample {
                image: Image::zeros([1, 1, 1]),
                label,
            })
        }

        fn label(&self, index: usize) -> Option<usize> {
            [Some(0), None, Some(1), Some(1)].get(index).copied().flatten()
        }
    }

    #[test]
    fn test_missing_label_is_an_error() {
        assert_eq!(GappyDataset.labels(), vec![0, 1, 1]);
        assert!(matches!(
            GappyDataset.try_labels(),
            Err(Error::Data { .. })
        ));
        assert!(matches!(
            balanced_subset(Arc::new(GappyDataset), ResamplePolicy::Oversample, BALANCE_SEED),
            Err(Error::Data { .. })
        ));
    }

    #[test]
    fn test_unknown_policy_rejected() {
        assert!(matches!(
            build_balanced_loader(skewed_dataset(), "smote", 4, 0),
            Err(Error::UnsupportedPolicy { .. })
        ));
    }

    #[test]
    fn test_zero_batch_size_rejected() {
        assert!(matches!(
            build_balanced_loader(skewed_dataset(), "oversample", 0, 0),
            Err(Error::InvalidConfig { .. })
        ));
    }

    #[test]
    fn test_parent_dataset_untouched() {
        let dataset = skewed_dataset();
        let before = dataset.labels();
        let _loader = build_balanced_loader(Arc::clone(&dataset), "undersample", 2, 0).unwrap();
        assert_eq!(dataset.labels(), before);
    }
}
