//! Class balance inspection.

use std::fmt::Write as _;

use crate::{
    config::FinetuneConfig,
    dataset::Dataset,
    datasets::{load_dataset, DatasetSource, Split},
    error::Result,
    imbalance::{ImbalanceDetector, ImbalanceReport},
    prompts::get_labels_textprompts,
    resample::{resample_indices, BALANCE_SEED},
};

/// Renders one row per class: id, name, count and share.
pub(crate) fn format_distribution(report: &ImbalanceReport, classes: &[&str]) -> String {
    let dist = &report.distribution;
    let mut out = String::new();
    let _ = writeln!(out, "{:>5}  {:<28} {:>8} {:>8}", "class", "name", "count", "share");
    for (&class, &count) in &dist.counts {
        let name = classes.get(class).copied().unwrap_or("?");
        let _ = writeln!(
            out,
            "{class:>5}  {name:<28} {count:>8} {:>7.2}%",
            dist.get_proportion(class) * 100.0
        );
    }
    let metrics = &report.metrics;
    let _ = writeln!(
        out,
        "total {}  ratio {:.2}  normalized entropy {:.3}  -> {}",
        dist.total,
        metrics.imbalance_ratio,
        metrics.normalized_entropy,
        metrics.severity.description()
    );
    out
}

/// Prints the distribution of `split` and, with a resampling policy, the
/// distribution the balanced loader would see.
pub(crate) fn cmd_balance(config: &FinetuneConfig, split: Split) -> Result<()> {
    let resolved = config.validate()?;
    let source = DatasetSource::from_config(config)?;
    let dataset = load_dataset(resolved.dataset, &source, split)?;
    let classes = get_labels_textprompts(resolved.dataset).classes;

    let labels = dataset.try_labels()?;
    let before = ImbalanceDetector::analyze(&dataset)?;
    println!("{} {:?} split", resolved.dataset, split);
    print!("{}", format_distribution(&before, classes));

    match resolved.resample {
        Some(policy) => {
            let indices = resample_indices(&labels, policy, BALANCE_SEED)?;
            let resampled: Vec<usize> = indices.iter().map(|&i| labels[i]).collect();
            let after = ImbalanceDetector::analyze_labels(&resampled);
            println!();
            println!("after {policy}:");
            print!("{}", format_distribution(&after, classes));
        }
        None => println!("no resampling policy selected"),
    }
    Ok(())
}
