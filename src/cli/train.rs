//! Finetuning and evaluation commands.

use std::path::Path;

use crate::{
    config::FinetuneConfig,
    dataloader::DataLoader,
    datasets::{get_dataloader, get_ft_dataloader, DatasetName, SharedDataset},
    encoder::{HashedTextEncoder, LinearImageEncoder},
    error::Result,
    finetune::{EvalReport, FinetuneReport, Finetuner},
    prompts::get_labels_textprompts,
    tracker::{ExperimentTracker, JsonlTracker, MemoryTracker},
    zeroshot::ZeroShotWeights,
};

/// Builds the offline encoder pair and wraps it in a finetuner.
pub(crate) fn build_finetuner(
    config: &FinetuneConfig,
    dataset: DatasetName,
) -> Result<Finetuner<LinearImageEncoder>> {
    let text = HashedTextEncoder::new(config.embed_dim, config.seed);
    let zeroshot = ZeroShotWeights::from_prompts(&text, &get_labels_textprompts(dataset))?;
    let side = config.image_size;
    let encoder = LinearImageEncoder::new([3, side, side], config.embed_dim, config.seed);
    Finetuner::from_config(encoder, &zeroshot, config)
}

fn print_accuracy(label: &str, report: &EvalReport) {
    println!(
        "{label}: top1 {:.2}%  top5 {:.2}%  ({} examples)",
        report.top1, report.top5, report.examples
    );
}

/// Finetune, evaluating before and after.
pub(crate) fn cmd_finetune(config: &FinetuneConfig, save_config: Option<&Path>) -> Result<()> {
    let resolved = config.validate()?;
    if let Some(path) = save_config {
        config.to_json(path)?;
        println!("Saved configuration to {}", path.display());
    }

    let (train, eval) = get_ft_dataloader(config)?;
    let mut finetuner = build_finetuner(config, resolved.dataset)?;

    println!(
        "Dataset: {} ({} train / {} eval)",
        resolved.dataset,
        train.len(),
        eval.len()
    );
    println!(
        "Group: {}  Method: {}  Optimizer: {}",
        resolved.group, resolved.method, resolved.optimizer
    );

    let before = finetuner.evaluate(&eval)?;
    print_accuracy("Zero-shot", &before);

    let report = match &config.tracker_path {
        Some(path) => {
            let mut tracker = JsonlTracker::create(path)?;
            let report = run_with(&mut finetuner, &train, config, &mut tracker)?;
            println!("Losses written to {}", path.display());
            report
        }
        None => run_with(&mut finetuner, &train, config, &mut MemoryTracker::new())?,
    };

    let after = finetuner.evaluate(&eval)?;
    print_accuracy("Finetuned", &after);
    print_summary(&report);
    Ok(())
}

fn run_with<T: ExperimentTracker>(
    finetuner: &mut Finetuner<LinearImageEncoder>,
    train: &DataLoader<SharedDataset>,
    config: &FinetuneConfig,
    tracker: &mut T,
) -> Result<FinetuneReport> {
    finetuner.run(train, config.num_iterations, config.iter_print_freq, tracker)
}

fn print_summary(report: &FinetuneReport) {
    println!(
        "Steps: {}  Passes: {}  Time: {:.2?}",
        report.steps, report.passes, report.elapsed
    );
    if let (Some(last), Some(mean)) = (report.final_loss(), report.mean_loss()) {
        println!("Loss: final {last:.4}  mean {mean:.4}");
    }
}

/// Zero-shot accuracy on the evaluation split.
pub(crate) fn cmd_eval(config: &FinetuneConfig) -> Result<()> {
    let resolved = config.validate()?;
    let loader = get_dataloader(config)?;
    let finetuner = build_finetuner(config, resolved.dataset)?;
    let report = finetuner.evaluate(&loader)?;
    println!(
        "Dataset: {}  Group: {}  Method: {}",
        resolved.dataset, resolved.group, resolved.method
    );
    print_accuracy("Zero-shot", &report);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn offline() -> FinetuneConfig {
        FinetuneConfig {
            data_root: "/nonexistent".into(),
            image_size: 8,
            embed_dim: 16,
            batch_size: 16,
            num_iterations: 3,
            num_workers: 0,
            ..FinetuneConfig::default()
        }
    }

    #[test]
    fn test_build_finetuner_image_shape() {
        let finetuner = build_finetuner(&offline(), DatasetName::Isic2018).unwrap();
        assert_eq!(finetuner.encoder().image_shape(), [3, 8, 8]);
    }

    #[test]
    fn test_cmd_finetune_writes_tracker_and_config() {
        let dir = tempfile::tempdir().unwrap();
        let tracker = dir.path().join("runs/loss.jsonl");
        let saved = dir.path().join("effective.json");
        let config = FinetuneConfig {
            tracker_path: Some(tracker.clone()),
            ..offline()
        };
        cmd_finetune(&config, Some(&saved)).unwrap();

        let records = JsonlTracker::read_records(&tracker).unwrap();
        assert_eq!(records.len(), 3);
        assert_eq!(FinetuneConfig::from_json(&saved).unwrap(), config);
    }

    #[test]
    fn test_cmd_eval_rejects_unknown_method() {
        let config = FinetuneConfig {
            method: "vote".to_string(),
            ..offline()
        };
        assert!(cmd_eval(&config).is_err());
        assert!(cmd_eval(&offline()).is_ok());
    }
}
