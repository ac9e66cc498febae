//! Finetuning run configuration.
//!
//! [`FinetuneConfig`] holds every knob of a finetuning or evaluation run. It
//! round-trips through JSON, and [`FinetuneConfig::resolve`] parses all
//! string selectors up front so that an unknown dataset, policy, group,
//! method or device fails before any data is touched.
//!
//! # Example
//!
//! ```
//! use equitune::config::FinetuneConfig;
//!
//! let cfg = FinetuneConfig::default();
//! let resolved = cfg.resolve().unwrap();
//! assert_eq!(resolved.group.size(), 4);
//! ```

use std::{
    fmt,
    path::{Path, PathBuf},
    str::FromStr,
};

use serde::{Deserialize, Serialize};

use crate::{
    datasets::DatasetName,
    equivariant::Method,
    error::{Error, Result},
    group::{Augmentation, Group},
    optim::OptimizerKind,
    resample::ResamplePolicy,
};

/// Where tensors live. Only the CPU is available.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Device {
    /// Host memory.
    #[default]
    Cpu,
}

impl FromStr for Device {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "cpu" => Ok(Self::Cpu),
            _ => Err(Error::UnsupportedDevice {
                name: s.to_string(),
            }),
        }
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("cpu")
    }
}

/// Complete configuration for a finetuning run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FinetuneConfig {
    /// Dataset selector: `ImagenetV2`, `CIFAR100`, `ISIC2018` or `MNIST`.
    pub dataset_name: String,
    /// Root directory of on-disk datasets. Built-in samples are used when
    /// the expected files are missing.
    pub data_root: PathBuf,
    /// Use the Kaggle directory layout for ISIC 2018.
    pub kaggle: bool,
    /// `oversample`, `undersample` or `none`.
    pub resample: String,
    /// Symmetry group: `rot90`, `flip` or `identity`.
    pub group_name: String,
    /// Random augmentation before group expansion: `rot90`, `flip` or `none`.
    pub data_transformations: String,
    /// `equitune`, `equizero` or `none`.
    pub method: String,
    /// Multiplier applied to cosine-similarity logits.
    pub logit_factor: f32,
    /// Apply a row softmax to the logits before reduction.
    pub softmax: bool,
    /// Examples per batch before group expansion.
    pub batch_size: usize,
    /// Number of optimizer steps.
    pub num_iterations: usize,
    /// Log progress every this many iterations.
    pub iter_print_freq: usize,
    /// Batch fetch threads (0 = training thread).
    pub num_workers: usize,
    /// Learning rate.
    pub lr: f32,
    /// SGD momentum.
    pub momentum: f32,
    /// AdamW weight decay.
    pub weight_decay: f32,
    /// `sgd` or `adamw`.
    pub optimizer: String,
    /// Device selector; only `cpu` is supported.
    pub device: String,
    /// Seed for shuffling, augmentation and encoder initialization.
    pub seed: u64,
    /// Side length images are resized to.
    pub image_size: usize,
    /// Feature width of the image and text encoders.
    pub embed_dim: usize,
    /// Optional JSON-lines file receiving per-iteration losses.
    pub tracker_path: Option<PathBuf>,
}

impl Default for FinetuneConfig {
    fn default() -> Self {
        Self {
            dataset_name: "MNIST".to_string(),
            data_root: PathBuf::from("data"),
            kaggle: false,
            resample: "none".to_string(),
            group_name: "rot90".to_string(),
            data_transformations: String::new(),
            method: "equitune".to_string(),
            logit_factor: 100.0,
            softmax: false,
            batch_size: 32,
            num_iterations: 100,
            iter_print_freq: 10,
            num_workers: 2,
            lr: 1e-3,
            momentum: 0.9,
            weight_decay: 0.0,
            optimizer: "sgd".to_string(),
            device: "cpu".to_string(),
            seed: 0,
            image_size: 28,
            embed_dim: 64,
            tracker_path: None,
        }
    }
}

/// A configuration with every selector parsed.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ResolvedConfig {
    /// Dataset.
    pub dataset: DatasetName,
    /// Resampling policy, if any.
    pub resample: Option<ResamplePolicy>,
    /// Symmetry group.
    pub group: Group,
    /// Random augmentation.
    pub augmentation: Augmentation,
    /// Reduction method.
    pub method: Method,
    /// Optimizer.
    pub optimizer: OptimizerKind,
    /// Device.
    pub device: Device,
}

impl FinetuneConfig {
    /// Load configuration from a JSON file and validate it.
    ///
    /// Fields missing from the file take their default values.
    ///
    /// # Errors
    ///
    /// Returns an I/O or JSON error, or the first validation failure.
    pub fn from_json(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| Error::io(e, path))?;
        let cfg: Self = serde_json::from_str(&contents)?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Serialize to pretty-printed JSON at `path`, creating parent
    /// directories.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the file cannot be written.
    pub fn to_json(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| Error::io(e, parent))?;
        }
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json).map_err(|e| Error::io(e, path))
    }

    /// Parses every string selector.
    ///
    /// # Errors
    ///
    /// Returns the matching `Unknown*` / `Unsupported*` error for the first
    /// selector that does not parse.
    pub fn resolve(&self) -> Result<ResolvedConfig> {
        Ok(ResolvedConfig {
            dataset: self.dataset_name.parse()?,
            resample: ResamplePolicy::parse_optional(&self.resample)?,
            group: self.group_name.parse()?,
            augmentation: self.data_transformations.parse()?,
            method: self.method.parse()?,
            optimizer: self.optimizer.parse()?,
            device: self.device.parse()?,
        })
    }

    /// Validate all fields, returning the first problem found.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] for out-of-range numbers and the
    /// selector errors of [`FinetuneConfig::resolve`].
    pub fn validate(&self) -> Result<ResolvedConfig> {
        if self.batch_size == 0 {
            return Err(Error::invalid_config("batch_size must be > 0"));
        }
        if self.num_iterations == 0 {
            return Err(Error::invalid_config("num_iterations must be > 0"));
        }
        if self.iter_print_freq == 0 {
            return Err(Error::invalid_config("iter_print_freq must be > 0"));
        }
        if !(self.logit_factor.is_finite() && self.logit_factor > 0.0) {
            return Err(Error::invalid_config("logit_factor must be > 0"));
        }
        if !(self.lr.is_finite() && self.lr > 0.0) {
            return Err(Error::invalid_config("lr must be > 0"));
        }
        if !(0.0..1.0).contains(&self.momentum) {
            return Err(Error::invalid_config("momentum must be in [0, 1)"));
        }
        if self.weight_decay < 0.0 {
            return Err(Error::invalid_config("weight_decay must be >= 0"));
        }
        if self.image_size == 0 || self.embed_dim == 0 {
            return Err(Error::invalid_config(
                "image_size and embed_dim must be > 0",
            ));
        }
        self.resolve()
    }
}
