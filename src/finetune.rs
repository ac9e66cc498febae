//! Group-equivariant finetuning and zero-shot evaluation.
//!
//! [`Finetuner`] runs a fixed number of optimizer steps over a cyclic loader:
//! augment, expand by the group, encode, project onto the zero-shot class
//! matrix, reduce over the group, and minimize cross-entropy. [`evaluate`]
//! runs one pass of the same forward path without gradients and reports
//! top-k accuracy.

use std::time::{Duration, Instant};

use ndarray::Array2;
use rand::{rngs::StdRng, SeedableRng};
use tracing::{debug, info};

use crate::{
    autograd::{backward, cross_entropy, l2_normalize, matmul, scale, softmax, softmax_rows, Tensor},
    config::FinetuneConfig,
    dataloader::DataLoader,
    dataset::Dataset,
    encoder::ImageEncoder,
    equivariant::{apply_method, reduce_group, Method},
    error::{Error, Result},
    group::{random_transformed_images, Augmentation, Group},
    optim::Optimizer,
    parallel::Batch,
    tracker::ExperimentTracker,
    zeroshot::ZeroShotWeights,
};

/// Run-level knobs of the training step.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StepSettings {
    /// Group the batch is expanded over.
    pub group: Group,
    /// Random augmentation before expansion.
    pub augmentation: Augmentation,
    /// Group reduction.
    pub method: Method,
    /// Logit multiplier.
    pub logit_factor: f32,
    /// Row softmax on the logits.
    pub softmax: bool,
}

impl Default for StepSettings {
    fn default() -> Self {
        Self {
            group: Group::Rot90,
            augmentation: Augmentation::None,
            method: Method::Equitune,
            logit_factor: 100.0,
            softmax: false,
        }
    }
}

/// Summary of a finished finetuning run.
#[derive(Debug, Clone, PartialEq)]
pub struct FinetuneReport {
    /// Optimizer steps taken.
    pub steps: usize,
    /// Loss of every step, in order.
    pub losses: Vec<f32>,
    /// Loader passes started, including the current one.
    pub passes: u64,
    /// Wall-clock training time.
    pub elapsed: Duration,
}

impl FinetuneReport {
    /// Loss of the last step.
    pub fn final_loss(&self) -> Option<f32> {
        self.losses.last().copied()
    }

    /// Mean loss over all steps.
    pub fn mean_loss(&self) -> Option<f32> {
        if self.losses.is_empty() {
            return None;
        }
        #[allow(clippy::cast_precision_loss)]
        let n = self.losses.len() as f32;
        Some(self.losses.iter().sum::<f32>() / n)
    }
}

/// Zero-shot accuracy over one loader pass.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EvalReport {
    /// Top-1 accuracy in percent.
    pub top1: f64,
    /// Top-5 accuracy in percent.
    pub top5: f64,
    /// Examples evaluated.
    pub examples: usize,
}

/// Finetunes an image encoder against fixed zero-shot class embeddings.
pub struct Finetuner<E: ImageEncoder> {
    encoder: E,
    classifier: Tensor,
    optimizer: Box<dyn Optimizer>,
    settings: StepSettings,
    rng: StdRng,
}

impl<E: ImageEncoder> std::fmt::Debug for Finetuner<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Finetuner")
            .field("settings", &self.settings)
            .field("embed_dim", &self.encoder.embed_dim())
            .field("lr", &self.optimizer.lr())
            .finish_non_exhaustive()
    }
}

impl<E: ImageEncoder> Finetuner<E> {
    /// Creates a finetuner.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ShapeMismatch`] if the encoder and the zero-shot
    /// matrix disagree on the embedding width, or
    /// [`Error::InvalidConfig`] for a non-positive logit factor.
    pub fn new(
        encoder: E,
        zeroshot: &ZeroShotWeights,
        optimizer: Box<dyn Optimizer>,
        settings: StepSettings,
        seed: u64,
    ) -> Result<Self> {
        if encoder.embed_dim() != zeroshot.embed_dim() {
            return Err(Error::shape(format!(
                "encoder produces {} features, zero-shot matrix expects {}",
                encoder.embed_dim(),
                zeroshot.embed_dim()
            )));
        }
        if !(settings.logit_factor.is_finite() && settings.logit_factor > 0.0) {
            return Err(Error::invalid_config("logit_factor must be > 0"));
        }
        Ok(Self {
            encoder,
            classifier: zeroshot.as_tensor(),
            optimizer,
            settings,
            rng: StdRng::seed_from_u64(seed),
        })
    }

    /// Creates a finetuner with the optimizer and step settings of `config`.
    ///
    /// # Errors
    ///
    /// Returns the validation error of `config`, or see
    /// [`Finetuner::new`].
    pub fn from_config(encoder: E, zeroshot: &ZeroShotWeights, config: &FinetuneConfig) -> Result<Self> {
        let resolved = config.validate()?;
        let optimizer = resolved
            .optimizer
            .build(config.lr, config.momentum, config.weight_decay);
        let settings = StepSettings {
            group: resolved.group,
            augmentation: resolved.augmentation,
            method: resolved.method,
            logit_factor: config.logit_factor,
            softmax: config.softmax,
        };
        Self::new(encoder, zeroshot, optimizer, settings, config.seed)
    }

    /// The encoder being trained.
    pub fn encoder(&self) -> &E {
        &self.encoder
    }

    /// Consumes the finetuner, returning the trained encoder.
    pub fn into_encoder(self) -> E {
        self.encoder
    }

    /// Step settings.
    pub fn settings(&self) -> StepSettings {
        self.settings
    }

    /// The optimizer.
    pub fn optimizer(&self) -> &dyn Optimizer {
        self.optimizer.as_ref()
    }

    /// Runs exactly `num_iterations` steps, cycling over `loader`.
    ///
    /// The loader restarts with a fresh shuffle whenever a pass ends. Every
    /// step's loss is reported to `tracker` under `loss`, and progress is
    /// logged every `iter_print_freq` steps.
    ///
    /// # Errors
    ///
    /// Returns [`Error::EmptyDataset`] for a loader with no batches, and
    /// aborts with the first error of any step.
    pub fn run<D, T>(
        &mut self,
        loader: &DataLoader<D>,
        num_iterations: usize,
        iter_print_freq: usize,
        tracker: &mut T,
    ) -> Result<FinetuneReport>
    where
        D: Dataset + 'static,
        T: ExperimentTracker + ?Sized,
    {
        if loader.num_batches() == 0 {
            return Err(Error::EmptyDataset);
        }
        let print_freq = iter_print_freq.max(1);
        info!(
            iterations = num_iterations,
            batches_per_pass = loader.num_batches(),
            group = %self.settings.group,
            method = %self.settings.method,
            "starting finetuning"
        );

        let mut batches = loader.clone().cycle();
        let mut losses = Vec::with_capacity(num_iterations);
        let start = Instant::now();
        for i in 0..num_iterations {
            if (i + 1) % print_freq == 0 {
                #[allow(clippy::cast_precision_loss)]
                let per_iter = start.elapsed().as_secs_f64() / (i + 1) as f64;
                info!(
                    iteration = i + 1,
                    "time elapsed per iter: {per_iter:.4}s"
                );
            }
            let batch = batches.next_batch()?;
            let loss = self.train_step(&batch)?;
            debug!(iteration = i, loss, "step");
            tracker.log_scalar(i as u64, "loss", f64::from(loss))?;
            losses.push(loss);
        }
        tracker.flush()?;

        let report = FinetuneReport {
            steps: losses.len(),
            losses,
            passes: batches.passes_started(),
            elapsed: start.elapsed(),
        };
        info!(
            steps = report.steps,
            passes = report.passes,
            final_loss = report.final_loss(),
            "finetuning finished"
        );
        Ok(report)
    }

    /// One optimizer step on `batch`, returning its loss.
    ///
    /// # Errors
    ///
    /// Returns shape errors from the group, encoder or reduction, and
    /// [`Error::Data`] if the loss is not finite.
    pub fn train_step(&mut self, batch: &Batch) -> Result<f32> {
        let images =
            random_transformed_images(&batch.images, self.settings.augmentation, &mut self.rng)?;
        let logits = self.logits(&self.settings.group.transform_batch(&images)?)?;
        let group_size = self.settings.group.size();
        let output = apply_method(&logits, group_size, self.settings.method)?;

        let targets = expand_targets(&batch.targets, output.rows());
        let loss = cross_entropy(&output, &targets)?;
        let value = loss.item();
        if !value.is_finite() {
            return Err(Error::data(format!("loss diverged to {value}")));
        }

        let params = self.encoder.parameters();
        self.optimizer.zero_grad(&params);
        backward(&loss, None);
        self.optimizer.step(&params);
        Ok(value)
    }

    /// Scaled (and optionally softmaxed) class logits of `images`.
    fn logits(&self, images: &crate::tensor::ImageBatch) -> Result<Tensor> {
        let features = l2_normalize(&self.encoder.encode_image(images)?);
        let logits = scale(&matmul(&features, &self.classifier)?, self.settings.logit_factor);
        Ok(if self.settings.softmax {
            softmax(&logits)
        } else {
            logits
        })
    }

    /// Zero-shot accuracy of the current encoder over one pass of `loader`.
    ///
    /// # Errors
    ///
    /// Returns the first loading or shape error.
    pub fn evaluate<D: Dataset + 'static>(&self, loader: &DataLoader<D>) -> Result<EvalReport> {
        evaluate(
            &self.encoder,
            &self.classifier.data(),
            self.settings,
            loader,
        )
    }
}

/// Repeats `targets` once per group copy when the output was not reduced.
fn expand_targets(targets: &[usize], rows: usize) -> Vec<usize> {
    if targets.is_empty() || rows == targets.len() {
        return targets.to_vec();
    }
    targets.iter().copied().cycle().take(rows).collect()
}

/// Zero-shot top-1/top-5 accuracy of `encoder` over one pass of `loader`.
///
/// Uses the inference reduction of `settings.method`: mean for equitune,
/// max for equizero. With [`Method::None`] only the untransformed images are
/// scored.
///
/// # Errors
///
/// Returns [`Error::EmptyDataset`] if the loader yields nothing, or the
/// first loading or shape error.
pub fn evaluate<E, D>(
    encoder: &E,
    classifier: &Array2<f32>,
    settings: StepSettings,
    loader: &DataLoader<D>,
) -> Result<EvalReport>
where
    E: ImageEncoder + ?Sized,
    D: Dataset + 'static,
{
    let classifier = Tensor::new(classifier.clone(), false);
    let (mut top1, mut top5, mut examples) = (0.0, 0.0, 0usize);
    for batch in loader.iter() {
        let batch = batch?;
        let (images, group_size) = match settings.method.inference_reduction() {
            Some(_) => (settings.group.transform_batch(&batch.images)?, settings.group.size()),
            None => (batch.images.clone(), 1),
        };
        let features = l2_normalize(&encoder.encode_image(&images)?);
        let logits = scale(&matmul(&features, &classifier)?, settings.logit_factor);
        let mut logits = logits.data().clone();
        if settings.softmax {
            logits = softmax_rows(&logits);
        }
        let output = match settings.method.inference_reduction() {
            Some(reduction) => reduce_group(&logits, group_size, reduction)?,
            None => logits,
        };

        let counts = accuracy(&output, &batch.targets, &[1, 5])?;
        top1 += counts[0];
        top5 += counts[1];
        examples += batch.len();
    }
    if examples == 0 {
        return Err(Error::EmptyDataset);
    }
    #[allow(clippy::cast_precision_loss)]
    let n = examples as f64;
    let report = EvalReport {
        top1: 100.0 * top1 / n,
        top5: 100.0 * top5 / n,
        examples,
    };
    info!(
        top1 = report.top1,
        top5 = report.top5,
        examples,
        method = %settings.method,
        "zero-shot evaluation"
    );
    Ok(report)
}

/// Number of rows whose target is among the `k` highest scores, per `k`.
///
/// Ties rank the lower class index first. `k` larger than the class count
/// counts every row.
///
/// # Errors
///
/// Returns [`Error::ShapeMismatch`] if `targets` and `output` disagree on the
/// number of rows.
pub fn accuracy(output: &Array2<f32>, targets: &[usize], topk: &[usize]) -> Result<Vec<f64>> {
    if output.nrows() != targets.len() {
        return Err(Error::shape(format!(
            "{} output rows for {} targets",
            output.nrows(),
            targets.len()
        )));
    }
    let max_k = topk.iter().copied().max().unwrap_or(0);
    let mut correct = vec![0.0; topk.len()];
    for (row, &target) in output.rows().into_iter().zip(targets) {
        let mut order: Vec<usize> = (0..row.len()).collect();
        order.sort_by(|&a, &b| row[b].total_cmp(&row[a]).then(a.cmp(&b)));
        let rank = order.iter().take(max_k).position(|&c| c == target);
        for (count, &k) in correct.iter_mut().zip(topk) {
            if rank.is_some_and(|r| r < k) {
                *count += 1.0;
            }
        }
    }
    Ok(correct)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::float_cmp, clippy::cast_precision_loss)]
mod tests {
    use std::sync::Arc;

    use ndarray::array;

    use super::*;
    use crate::{
        dataloader::DataLoaderBuilder,
        dataset::ArrowImageDataset,
        encoder::{HashedTextEncoder, LinearImageEncoder},
        optim::Sgd,
        tensor::Image,
        tracker::MemoryTracker,
    };

    const CLASSES: [&str; 3] = ["zero", "one", "two"];

    fn dataset(n: usize) -> Arc<ArrowImageDataset> {
        let images: Vec<Image> = (0..n)
            .map(|i| {
                let v: Vec<f32> = (0..16).map(|p| ((i * 7 + p) % 5) as f32 / 5.0).collect();
                Image::from_vec(v, [1, 4, 4]).unwrap()
            })
            .collect();
        let labels: Vec<usize> = (0..n).map(|i| i % 3).collect();
        Arc::new(ArrowImageDataset::from_images(&images, &labels).unwrap())
    }

    fn finetuner(settings: StepSettings) -> Finetuner<LinearImageEncoder> {
        let text = HashedTextEncoder::new(8, 1);
        let zeroshot = ZeroShotWeights::build(&text, &CLASSES, &["a photo of {}."]).unwrap();
        let encoder = LinearImageEncoder::new([1, 4, 4], 8, 3);
        Finetuner::new(encoder, &zeroshot, Box::new(Sgd::new(0.01, 0.9)), settings, 0).unwrap()
    }

    fn loader(n: usize, batch_size: usize) -> DataLoader<ArrowImageDataset> {
        DataLoaderBuilder::new()
            .batch_size(batch_size)
            .shuffle(true)
            .seed(5)
            .build_arc(dataset(n))
            .unwrap()
    }

    #[test]
    fn test_accuracy_counts() {
        let output = array![[0.1f32, 0.7, 0.2], [0.5, 0.3, 0.2], [0.2, 0.3, 0.5]];
        // rows 1 and 2 rank their targets last, so only top-3 catches them
        let counts = accuracy(&output, &[1, 2, 0], &[1, 2, 3]).unwrap();
        assert_eq!(counts, vec![1.0, 1.0, 3.0]);
    }

    #[test]
    fn test_accuracy_rejects_mismatched_targets() {
        let output = Array2::<f32>::zeros((2, 3));
        assert!(matches!(
            accuracy(&output, &[0], &[1]),
            Err(Error::ShapeMismatch { .. })
        ));
    }

    #[test]
    fn test_run_counts_steps_past_one_pass() {
        let loader = loader(7, 3); // 3 batches per pass
        let mut tuner = finetuner(StepSettings::default());
        let mut tracker = MemoryTracker::new();
        let report = tuner.run(&loader, 10, 4, &mut tracker).unwrap();

        assert_eq!(report.steps, 10);
        assert_eq!(tuner.optimizer().steps(), 10);
        assert_eq!(tracker.values("loss").len(), 10);
        assert_eq!(report.passes, 4);
        let steps: Vec<u64> = tracker.records().iter().map(|r| r.step).collect();
        assert_eq!(steps, (0..10).collect::<Vec<_>>());
    }

    #[test]
    fn test_step_updates_encoder() {
        let mut tuner = finetuner(StepSettings {
            method: Method::Equizero,
            augmentation: Augmentation::Flip,
            ..StepSettings::default()
        });
        let before = tuner.encoder().weight().data().clone();
        let batch = loader(6, 6).iter().next().unwrap().unwrap();
        let loss = tuner.train_step(&batch).unwrap();
        assert!(loss.is_finite());
        assert_ne!(*tuner.encoder().weight().data(), before);
    }

    #[test]
    fn test_unreduced_method_trains_every_copy() {
        let mut tuner = finetuner(StepSettings {
            method: Method::None,
            group: Group::Flip,
            softmax: true,
            ..StepSettings::default()
        });
        let batch = loader(4, 4).iter().next().unwrap().unwrap();
        assert!(tuner.train_step(&batch).unwrap().is_finite());
        assert_eq!(expand_targets(&[1, 2], 4), vec![1, 2, 1, 2]);
    }

    #[test]
    fn test_non_square_rotation_aborts_run() {
        let images = vec![Image::zeros([1, 2, 3]); 2];
        let ds = ArrowImageDataset::from_images(&images, &[0, 1]).unwrap();
        let loader = DataLoaderBuilder::new().batch_size(2).build(ds).unwrap();

        let text = HashedTextEncoder::new(4, 0);
        let zeroshot = ZeroShotWeights::build(&text, &CLASSES[..2], &["{}"]).unwrap();
        let encoder = LinearImageEncoder::new([1, 2, 3], 4, 0);
        let mut tuner = Finetuner::new(
            encoder,
            &zeroshot,
            Box::new(Sgd::new(0.1, 0.0)),
            StepSettings::default(),
            0,
        )
        .unwrap();
        let mut tracker = MemoryTracker::new();
        assert!(matches!(
            tuner.run(&loader, 3, 1, &mut tracker),
            Err(Error::GroupShapeMismatch { .. })
        ));
        assert!(tracker.is_empty());
    }

    #[test]
    fn test_embed_dim_mismatch_rejected() {
        let text = HashedTextEncoder::new(5, 0);
        let zeroshot = ZeroShotWeights::build(&text, &CLASSES, &["{}"]).unwrap();
        let encoder = LinearImageEncoder::new([1, 4, 4], 8, 0);
        assert!(Finetuner::new(
            encoder,
            &zeroshot,
            Box::new(Sgd::new(0.1, 0.0)),
            StepSettings::default(),
            0
        )
        .is_err());
    }

    #[test]
    fn test_evaluate_reports_percentages() {
        let tuner = finetuner(StepSettings {
            method: Method::Equizero,
            ..StepSettings::default()
        });
        let report = tuner.evaluate(&loader(9, 4)).unwrap();
        assert_eq!(report.examples, 9);
        assert!((0.0..=100.0).contains(&report.top1));
        // three classes: every target is inside the top five
        assert_eq!(report.top5, 100.0);
    }

    #[test]
    fn test_from_config_rejects_bad_selectors() {
        let text = HashedTextEncoder::new(8, 1);
        let zeroshot = ZeroShotWeights::build(&text, &CLASSES, &["{}"]).unwrap();
        let config = FinetuneConfig {
            method: "equimax".to_string(),
            ..FinetuneConfig::default()
        };
        let encoder = LinearImageEncoder::new([1, 4, 4], 8, 0);
        assert!(matches!(
            Finetuner::from_config(encoder, &zeroshot, &config),
            Err(Error::UnknownMethod { .. })
        ));
    }
}
