//! equitune - class-balanced loading and group-equivariant finetuning
//!
//! Tools for finetuning zero-shot image classifiers so their predictions are
//! invariant to a symmetry group (90-degree rotations, horizontal flips), and
//! for feeding them class-balanced data.
//!
//! # Design Principles
//!
//! 1. **Arrow storage** - preprocessed images live in Arrow `RecordBatch`es
//! 2. **Ordered parallel loading** - worker threads, deterministic batch order
//! 3. **Offline by default** - every dataset except ImageNet-V2 has an
//!    embedded sample, so pipelines run without downloads
//! 4. **Explicit errors** - invalid selectors fail before any data is read
//!
//! # Quick Start
//!
//! ```
//! use equitune::{
//!     config::FinetuneConfig,
//!     datasets::get_ft_dataloader,
//!     encoder::{HashedTextEncoder, LinearImageEncoder},
//!     prompts::get_labels_textprompts,
//!     tracker::MemoryTracker,
//!     Finetuner, ZeroShotWeights,
//! };
//!
//! # fn main() -> equitune::Result<()> {
//! let config = FinetuneConfig {
//!     data_root: "/nonexistent".into(),
//!     image_size: 8,
//!     embed_dim: 16,
//!     num_iterations: 3,
//!     num_workers: 0,
//!     ..FinetuneConfig::default()
//! };
//! let resolved = config.validate()?;
//! let (train, _eval) = get_ft_dataloader(&config)?;
//!
//! let text = HashedTextEncoder::new(config.embed_dim, config.seed);
//! let zeroshot = ZeroShotWeights::from_prompts(&text, &get_labels_textprompts(resolved.dataset))?;
//! let image = LinearImageEncoder::new([3, 8, 8], config.embed_dim, config.seed);
//!
//! let mut finetuner = Finetuner::from_config(image, &zeroshot, &config)?;
//! let mut tracker = MemoryTracker::new();
//! let report = finetuner.run(&train, config.num_iterations, config.iter_print_freq, &mut tracker)?;
//! assert_eq!(report.steps, 3);
//! assert_eq!(tracker.values("loss").len(), 3);
//! # Ok(())
//! # }
//! ```

#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
// Allow common test patterns
#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::cast_lossless,
        clippy::cast_possible_truncation,
        clippy::cast_possible_wrap,
        clippy::cast_precision_loss,
        clippy::redundant_clone,
        clippy::needless_collect,
        clippy::too_many_lines,
        clippy::float_cmp,
        clippy::similar_names,
        clippy::unreadable_literal
    )
)]
// Allow some pedantic lints for cleaner code
#![allow(clippy::doc_markdown)]
#![allow(clippy::uninlined_format_args)]
#![allow(clippy::redundant_closure_for_method_calls)]
#![allow(clippy::map_unwrap_or)]
#![allow(clippy::module_name_repetitions)]

pub mod autograd;
pub mod balanced;
/// CLI module for command-line interface
#[cfg(feature = "cli")]
pub mod cli;
pub mod config;
pub mod dataloader;
pub mod dataset;
pub mod datasets;
pub mod encoder;
pub mod equivariant;
pub mod error;
pub mod finetune;
pub mod group;
pub mod imbalance;
pub mod optim;
pub mod parallel;
pub mod prompts;
pub mod resample;
pub mod tensor;
pub mod tracker;
pub mod zeroshot;

// Re-exports for convenience
pub use arrow::{
    array::RecordBatch,
    datatypes::{Schema, SchemaRef},
};
pub use balanced::{balanced_loader, build_balanced_loader};
pub use config::{Device, FinetuneConfig, ResolvedConfig};
pub use dataloader::{CyclicLoader, DataLoader, DataLoaderBuilder};
pub use dataset::{ArrowImageDataset, Dataset, Sample, Subset};
pub use datasets::{get_dataloader, get_ft_dataloader, DatasetName, SharedDataset, Split};
pub use equivariant::{Method, Reduction};
pub use error::{Error, Result};
pub use finetune::{EvalReport, FinetuneReport, Finetuner, StepSettings};
pub use group::{Augmentation, Group};
pub use imbalance::{
    ClassDistribution, ImbalanceDetector, ImbalanceMetrics, ImbalanceReport, ImbalanceSeverity,
};
pub use parallel::{Batch, BatchIter};
pub use resample::{ResamplePolicy, Resampler, BALANCE_SEED};
pub use tensor::{Image, ImageBatch};
pub use tracker::{ExperimentTracker, JsonlTracker, MemoryTracker};
pub use zeroshot::ZeroShotWeights;
