//! Benchmark dataset loaders.
//!
//! Each supported dataset has a constructor in [`REGISTRY`] that builds a
//! train or eval split from a [`DatasetSource`]. MNIST, CIFAR-100 and
//! ISIC 2018 fall back to small embedded samples when their files are not
//! under the data root, so every pipeline also runs offline.
//!
//! # Example
//!
//! ```
//! use equitune::{config::FinetuneConfig, datasets::get_ft_dataloader};
//!
//! # fn main() -> equitune::Result<()> {
//! let config = FinetuneConfig {
//!     data_root: "/nonexistent".into(),
//!     image_size: 8,
//!     ..FinetuneConfig::default()
//! };
//! let (train, eval) = get_ft_dataloader(&config)?;
//! assert!(train.num_batches() > 0 && eval.num_batches() > 0);
//! # Ok(())
//! # }
//! ```

pub mod cifar100;
pub mod imagenetv2;
pub mod isic2018;
pub mod mnist;
pub mod preprocess;
pub mod source;

use std::{
    fmt,
    path::{Path, PathBuf},
    str::FromStr,
    sync::Arc,
};

use serde::{Deserialize, Serialize};
use tracing::info;

pub use preprocess::Preprocess;
pub use source::{ImageFileDataset, PixelLayout, RawImageDataset};

use crate::{
    balanced::balanced_subset,
    config::FinetuneConfig,
    dataloader::{DataLoader, DataLoaderBuilder},
    dataset::Dataset,
    error::{Error, Result},
    resample::{ResamplePolicy, BALANCE_SEED},
};

/// A dataset behind a shared, type-erased handle.
pub type SharedDataset = Arc<dyn Dataset>;

/// Supported benchmark datasets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DatasetName {
    /// ImageNet-V2 matched-frequency.
    ImagenetV2,
    /// CIFAR-100, fine labels.
    Cifar100,
    /// ISIC 2018 Task 3 skin lesions.
    Isic2018,
    /// MNIST digits.
    Mnist,
}

impl DatasetName {
    /// Every supported dataset.
    pub const ALL: [Self; 4] = [Self::ImagenetV2, Self::Cifar100, Self::Isic2018, Self::Mnist];

    /// Canonical name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ImagenetV2 => "ImagenetV2",
            Self::Cifar100 => "CIFAR100",
            Self::Isic2018 => "ISIC2018",
            Self::Mnist => "MNIST",
        }
    }
}

impl FromStr for DatasetName {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let wanted = s.trim();
        Self::ALL
            .into_iter()
            .find(|name| name.as_str().eq_ignore_ascii_case(wanted))
            .ok_or_else(|| Error::UnknownDataset {
                name: s.to_string(),
            })
    }
}

impl fmt::Display for DatasetName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which part of a dataset to load.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Split {
    /// Finetuning data.
    Train,
    /// Held-out evaluation data.
    Eval,
}

/// Where and how dataset files are read.
#[derive(Debug, Clone, PartialEq)]
pub struct DatasetSource {
    /// Data root directory.
    pub root: PathBuf,
    /// Kaggle directory layout (ISIC 2018).
    pub kaggle: bool,
    /// Image preprocessing.
    pub preprocess: Preprocess,
    /// Seed for random train/eval splits.
    pub seed: u64,
}

impl DatasetSource {
    /// Standard layout under `root`, seed 0.
    pub fn new(root: impl AsRef<Path>, preprocess: Preprocess) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
            kaggle: false,
            preprocess,
            seed: 0,
        }
    }

    /// Source described by `config`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] for an invalid image size.
    pub fn from_config(config: &FinetuneConfig) -> Result<Self> {
        Ok(Self {
            root: config.data_root.clone(),
            kaggle: config.kaggle,
            preprocess: Preprocess::clip(config.image_size)?,
            seed: config.seed,
        })
    }
}

/// Builds one split of a dataset.
pub type Constructor = fn(&DatasetSource, Split) -> Result<SharedDataset>;

/// Constructor of every supported dataset.
pub static REGISTRY: [(DatasetName, Constructor); 4] = [
    (DatasetName::ImagenetV2, imagenetv2::load),
    (DatasetName::Cifar100, cifar100::load),
    (DatasetName::Isic2018, isic2018::load),
    (DatasetName::Mnist, mnist::load),
];

/// Loads `split` of `name`.
///
/// # Errors
///
/// Returns the constructor's error.
pub fn load_dataset(name: DatasetName, source: &DatasetSource, split: Split) -> Result<SharedDataset> {
    let constructor = REGISTRY
        .iter()
        .find(|(registered, _)| *registered == name)
        .map(|&(_, constructor)| constructor)
        .ok_or_else(|| Error::UnknownDataset {
            name: name.to_string(),
        })?;
    let dataset = constructor(source, split)?;
    info!(
        dataset = %name,
        split = ?split,
        examples = dataset.len(),
        "loaded dataset"
    );
    Ok(dataset)
}

/// Wraps `dataset` in a loader, balancing it first when `policy` is set.
///
/// Balanced loaders always shuffle.
///
/// # Errors
///
/// Returns [`Error::EmptyDataset`] or [`Error::InvalidConfig`] from the
/// builder.
pub fn make_loader(
    dataset: SharedDataset,
    policy: Option<ResamplePolicy>,
    batch_size: usize,
    num_workers: usize,
    shuffle: bool,
    seed: u64,
) -> Result<DataLoader<SharedDataset>> {
    let (dataset, shuffle) = match policy {
        Some(policy) => {
            let balanced: SharedDataset =
                Arc::new(balanced_subset(Arc::new(dataset), policy, BALANCE_SEED)?);
            (balanced, true)
        }
        None => (dataset, shuffle),
    };
    DataLoaderBuilder::new()
        .batch_size(batch_size)
        .shuffle(shuffle)
        .seed(seed)
        .num_workers(num_workers)
        .build(dataset)
}

/// The evaluation loader for zero-shot runs.
///
/// Selectors are parsed before anything is loaded.
///
/// # Errors
///
/// Returns selector, loading or loader errors.
pub fn get_dataloader(config: &FinetuneConfig) -> Result<DataLoader<SharedDataset>> {
    let resolved = config.validate()?;
    let source = DatasetSource::from_config(config)?;
    let dataset = load_dataset(resolved.dataset, &source, Split::Eval)?;
    make_loader(
        dataset,
        resolved.resample,
        config.batch_size,
        config.num_workers,
        true,
        config.seed,
    )
}

/// Finetuning and evaluation loaders.
///
/// The train loader shuffles every pass; the eval loader keeps dataset
/// order unless it is balanced.
///
/// # Errors
///
/// Returns selector, loading or loader errors.
pub fn get_ft_dataloader(
    config: &FinetuneConfig,
) -> Result<(DataLoader<SharedDataset>, DataLoader<SharedDataset>)> {
    let resolved = config.validate()?;
    let source = DatasetSource::from_config(config)?;
    let train = load_dataset(resolved.dataset, &source, Split::Train)?;
    let eval = load_dataset(resolved.dataset, &source, Split::Eval)?;
    Ok((
        make_loader(
            train,
            resolved.resample,
            config.batch_size,
            config.num_workers,
            true,
            config.seed,
        )?,
        make_loader(
            eval,
            resolved.resample,
            config.batch_size,
            config.num_workers,
            false,
            config.seed,
        )?,
    ))
}
