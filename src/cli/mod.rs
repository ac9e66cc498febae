//! equitune CLI - balanced loading and equivariant finetuning
//!
//! Command-line interface over the library: finetune and evaluate zero-shot
//! classifiers, inspect class balance, and list prompt sets.

use std::{
    path::{Path, PathBuf},
    process::ExitCode,
};

use clap::{Args, Parser, Subcommand};
use tracing::info;

use crate::{config::FinetuneConfig, datasets::Split, error::Result};

mod balance;
mod prompts;
mod train;

/// equitune - class-balanced loading and group-equivariant finetuning
#[derive(Parser)]
#[command(name = "equitune")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true, default_value = "info")]
    log_level: String,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Finetune a zero-shot classifier and report accuracy before and after
    Finetune {
        #[command(flatten)]
        run: RunArgs,
        /// Number of optimizer steps
        #[arg(long)]
        iterations: Option<usize>,
        /// Learning rate
        #[arg(long)]
        lr: Option<f32>,
        /// Optimizer (sgd, adamw)
        #[arg(long)]
        optimizer: Option<String>,
        /// Random augmentation before group expansion (rot90, flip, none)
        #[arg(long)]
        augment: Option<String>,
        /// JSON-lines file receiving per-iteration losses
        #[arg(long)]
        tracker: Option<PathBuf>,
        /// Write the effective configuration to this file
        #[arg(long)]
        save_config: Option<PathBuf>,
    },
    /// Zero-shot top-1/top-5 accuracy on the evaluation split
    Eval {
        #[command(flatten)]
        run: RunArgs,
    },
    /// Show the class distribution before and after resampling
    Balance {
        #[command(flatten)]
        run: RunArgs,
        /// Inspect the evaluation split instead of the training split
        #[arg(long)]
        eval: bool,
    },
    /// List class names and rendered prompt templates
    Prompts {
        /// Dataset name (ImagenetV2, CIFAR100, ISIC2018, MNIST)
        dataset: String,
        /// Only show prompts for this class id
        #[arg(short, long)]
        class: Option<usize>,
        /// Maximum number of classes to list
        #[arg(short = 'n', long, default_value = "10")]
        limit: usize,
    },
}

/// Options shared by every command that loads data.
///
/// Flags override values from `--config`.
#[derive(Args, Debug, Clone, Default)]
struct RunArgs {
    /// JSON configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,
    /// Dataset name (ImagenetV2, CIFAR100, ISIC2018, MNIST)
    #[arg(short, long)]
    dataset: Option<String>,
    /// Root directory of on-disk datasets
    #[arg(long)]
    data_root: Option<PathBuf>,
    /// Use the Kaggle directory layout for ISIC 2018
    #[arg(long)]
    kaggle: bool,
    /// Resampling policy (oversample, undersample, none)
    #[arg(long)]
    resample: Option<String>,
    /// Symmetry group (rot90, flip, identity)
    #[arg(long)]
    group: Option<String>,
    /// Group reduction (equitune, equizero, none)
    #[arg(long)]
    method: Option<String>,
    /// Examples per batch
    #[arg(short, long)]
    batch_size: Option<usize>,
    /// Loader worker threads
    #[arg(long)]
    workers: Option<usize>,
    /// Image side length
    #[arg(long)]
    image_size: Option<usize>,
    /// Seed for shuffling, augmentation and initialization
    #[arg(long)]
    seed: Option<u64>,
}

impl RunArgs {
    /// Loads `--config` (or the defaults) and applies the flags on top.
    fn resolve(&self) -> Result<FinetuneConfig> {
        let mut config = match &self.config {
            Some(path) => {
                info!(path = %path.display(), "loading configuration");
                FinetuneConfig::from_json(path)?
            }
            None => FinetuneConfig::default(),
        };
        if let Some(dataset) = &self.dataset {
            config.dataset_name.clone_from(dataset);
        }
        if let Some(root) = &self.data_root {
            config.data_root.clone_from(root);
        }
        config.kaggle |= self.kaggle;
        if let Some(resample) = &self.resample {
            config.resample.clone_from(resample);
        }
        if let Some(group) = &self.group {
            config.group_name.clone_from(group);
        }
        if let Some(method) = &self.method {
            config.method.clone_from(method);
        }
        if let Some(batch_size) = self.batch_size {
            config.batch_size = batch_size;
        }
        if let Some(workers) = self.workers {
            config.num_workers = workers;
        }
        if let Some(size) = self.image_size {
            config.image_size = size;
        }
        if let Some(seed) = self.seed {
            config.seed = seed;
        }
        Ok(config)
    }
}

fn init_tracing(level: &str) {
    let filter = level
        .parse::<tracing_subscriber::filter::LevelFilter>()
        .unwrap_or(tracing_subscriber::filter::LevelFilter::INFO);
    tracing_subscriber::fmt()
        .with_max_level(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

#[allow(clippy::too_many_arguments)]
fn finetune(
    run: &RunArgs,
    iterations: Option<usize>,
    lr: Option<f32>,
    optimizer: Option<&str>,
    augment: Option<&str>,
    tracker: Option<&Path>,
    save_config: Option<&Path>,
) -> Result<()> {
    let mut config = run.resolve()?;
    if let Some(iterations) = iterations {
        config.num_iterations = iterations;
    }
    if let Some(lr) = lr {
        config.lr = lr;
    }
    if let Some(optimizer) = optimizer {
        config.optimizer = optimizer.to_string();
    }
    if let Some(augment) = augment {
        config.data_transformations = augment.to_string();
    }
    if let Some(tracker) = tracker {
        config.tracker_path = Some(tracker.to_path_buf());
    }
    train::cmd_finetune(&config, save_config)
}

/// Run the equitune CLI.
pub fn run() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(&cli.log_level);

    let result = match cli.command {
        Commands::Finetune {
            run,
            iterations,
            lr,
            optimizer,
            augment,
            tracker,
            save_config,
        } => finetune(
            &run,
            iterations,
            lr,
            optimizer.as_deref(),
            augment.as_deref(),
            tracker.as_deref(),
            save_config.as_deref(),
        ),
        Commands::Eval { run } => run.resolve().and_then(|config| train::cmd_eval(&config)),
        Commands::Balance { run, eval } => {
            let split = if eval { Split::Eval } else { Split::Train };
            run.resolve()
                .and_then(|config| balance::cmd_balance(&config, split))
        }
        Commands::Prompts {
            dataset,
            class,
            limit,
        } => prompts::cmd_prompts(&dataset, class, limit),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_finetune_flags() {
        let cli = Cli::try_parse_from([
            "equitune",
            "finetune",
            "--dataset",
            "ISIC2018",
            "--resample",
            "oversample",
            "--iterations",
            "5",
            "--log-level",
            "debug",
        ])
        .unwrap();
        assert_eq!(cli.log_level, "debug");
        let Commands::Finetune {
            run, iterations, ..
        } = cli.command
        else {
            panic!("expected finetune");
        };
        assert_eq!(iterations, Some(5));
        let config = run.resolve().unwrap();
        assert_eq!(config.dataset_name, "ISIC2018");
        assert_eq!(config.resample, "oversample");
        // untouched fields keep their defaults
        assert_eq!(config.group_name, "rot90");
    }

    #[test]
    fn test_flags_override_config_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run.json");
        let file_config = FinetuneConfig {
            dataset_name: "CIFAR100".to_string(),
            batch_size: 8,
            method: "equizero".to_string(),
            ..FinetuneConfig::default()
        };
        file_config.to_json(&path).unwrap();

        let run = RunArgs {
            config: Some(path),
            batch_size: Some(4),
            ..RunArgs::default()
        };
        let config = run.resolve().unwrap();
        assert_eq!(config.dataset_name, "CIFAR100");
        assert_eq!(config.method, "equizero");
        assert_eq!(config.batch_size, 4);
    }

    #[test]
    fn test_missing_config_file_is_an_error() {
        let run = RunArgs {
            config: Some(PathBuf::from("/nonexistent/run.json")),
            ..RunArgs::default()
        };
        assert!(run.resolve().is_err());
    }

    #[test]
    fn test_prompts_requires_dataset() {
        assert!(Cli::try_parse_from(["equitune", "prompts"]).is_err());
        assert!(Cli::try_parse_from(["equitune", "prompts", "MNIST", "-c", "3"]).is_ok());
    }
}
