//! Class imbalance analysis for labeled datasets
//!
//! Summarizes the label distribution of a [`Dataset`] and grades how far it
//! is from uniform. Used to report the effect of resampling.
//!
//! # Example
//!
//! ```ignore
//! use equitune::imbalance::ImbalanceDetector;
//!
//! let report = ImbalanceDetector::analyze(&dataset)?;
//! if report.is_imbalanced() {
//!     println!("Imbalance ratio: {:.2}", report.metrics.imbalance_ratio);
//! }
//! ```

// Statistical computation requires usize->f64 casts
#![allow(clippy::cast_precision_loss)]

use std::collections::BTreeMap;

use crate::{
    dataset::Dataset,
    error::{Error, Result},
};

/// Severity of class imbalance
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ImbalanceSeverity {
    /// Balanced dataset (ratio < 1.5)
    None,
    /// Slight imbalance (1.5 <= ratio < 3)
    Low,
    /// Moderate imbalance (3 <= ratio < 10)
    Moderate,
    /// Severe imbalance (10 <= ratio < 100)
    Severe,
    /// Extreme imbalance (ratio >= 100)
    Extreme,
}

impl ImbalanceSeverity {
    /// Create severity from imbalance ratio (majority/minority)
    pub fn from_ratio(ratio: f64) -> Self {
        if ratio < 1.5 {
            Self::None
        } else if ratio < 3.0 {
            Self::Low
        } else if ratio < 10.0 {
            Self::Moderate
        } else if ratio < 100.0 {
            Self::Severe
        } else {
            Self::Extreme
        }
    }

    /// Check if this represents actual imbalance
    pub fn is_imbalanced(&self) -> bool {
        *self != Self::None
    }

    /// Get human-readable description
    pub fn description(&self) -> &'static str {
        match self {
            Self::None => "Balanced",
            Self::Low => "Slightly imbalanced",
            Self::Moderate => "Moderately imbalanced",
            Self::Severe => "Severely imbalanced",
            Self::Extreme => "Extremely imbalanced",
        }
    }
}

/// Distribution of class ids in a dataset
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassDistribution {
    /// Count per class id, ordered by class id
    pub counts: BTreeMap<usize, usize>,
    /// Total number of samples
    pub total: usize,
}

impl ClassDistribution {
    /// Count occurrences of every label.
    pub fn from_labels(labels: &[usize]) -> Self {
        let mut counts = BTreeMap::new();
        for &label in labels {
            *counts.entry(label).or_insert(0) += 1;
        }
        Self {
            counts,
            total: labels.len(),
        }
    }

    /// Number of distinct classes present.
    pub fn num_classes(&self) -> usize {
        self.counts.len()
    }

    /// Get count for a specific class
    pub fn get_count(&self, class: usize) -> usize {
        self.counts.get(&class).copied().unwrap_or(0)
    }

    /// Get proportion for a specific class
    pub fn get_proportion(&self, class: usize) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            self.get_count(class) as f64 / self.total as f64
        }
    }

    /// Largest class count.
    pub fn max_count(&self) -> usize {
        self.counts.values().copied().max().unwrap_or(0)
    }

    /// Smallest class count among present classes.
    pub fn min_count(&self) -> usize {
        self.counts.values().copied().min().unwrap_or(0)
    }

    /// Class with the most samples (lowest id on ties).
    pub fn majority_class(&self) -> Option<usize> {
        let max = self.max_count();
        self.counts.iter().find(|(_, &v)| v == max).map(|(&k, _)| k)
    }

    /// Class with the fewest samples (lowest id on ties).
    pub fn minority_class(&self) -> Option<usize> {
        let min = self.min_count();
        self.counts.iter().find(|(_, &v)| v == min).map(|(&k, _)| k)
    }

    /// True when every present class has the same count.
    pub fn is_uniform(&self) -> bool {
        self.max_count() == self.min_count()
    }
}

/// Metrics for measuring class imbalance
#[derive(Debug, Clone)]
pub struct ImbalanceMetrics {
    /// Ratio of majority to minority class (>= 1.0)
    pub imbalance_ratio: f64,
    /// Shannon entropy of class distribution (0 = single class, log(n) =
    /// uniform)
    pub entropy: f64,
    /// Normalized entropy (0-1, 1 = perfectly balanced)
    pub normalized_entropy: f64,
    /// Severity classification
    pub severity: ImbalanceSeverity,
}

impl ImbalanceMetrics {
    /// Create metrics from a class distribution
    pub fn from_distribution(distribution: &ClassDistribution) -> Self {
        if distribution.total == 0 {
            return Self {
                imbalance_ratio: 1.0,
                entropy: 0.0,
                normalized_entropy: 1.0,
                severity: ImbalanceSeverity::None,
            };
        }

        let total_f = distribution.total as f64;
        let imbalance_ratio =
            distribution.max_count() as f64 / distribution.min_count().max(1) as f64;

        // Shannon entropy: -sum(p * log(p))
        let entropy: f64 = distribution
            .counts
            .values()
            .map(|&c| {
                let p = c as f64 / total_f;
                -p * p.ln()
            })
            .sum();

        let max_entropy = (distribution.num_classes() as f64).ln();
        let normalized_entropy = if max_entropy > 0.0 {
            entropy / max_entropy
        } else {
            1.0
        };

        Self {
            imbalance_ratio,
            entropy,
            normalized_entropy,
            severity: ImbalanceSeverity::from_ratio(imbalance_ratio),
        }
    }

    /// Check if the dataset is imbalanced
    pub fn is_imbalanced(&self) -> bool {
        self.severity.is_imbalanced()
    }
}

/// Report from imbalance analysis
#[derive(Debug, Clone)]
pub struct ImbalanceReport {
    /// Class distribution
    pub distribution: ClassDistribution,
    /// Imbalance metrics
    pub metrics: ImbalanceMetrics,
}

impl ImbalanceReport {
    /// Create report from distribution
    pub fn from_distribution(distribution: ClassDistribution) -> Self {
        let metrics = ImbalanceMetrics::from_distribution(&distribution);
        Self {
            distribution,
            metrics,
        }
    }

    /// Check if the dataset is imbalanced
    pub fn is_imbalanced(&self) -> bool {
        self.metrics.is_imbalanced()
    }

    /// Get severity
    pub fn severity(&self) -> ImbalanceSeverity {
        self.metrics.severity
    }
}

/// Detector for class imbalance in datasets
pub struct ImbalanceDetector;

impl ImbalanceDetector {
    /// Analyze a dataset for class imbalance
    ///
    /// # Errors
    ///
    /// Returns [`Error::EmptyDataset`] for datasets without examples and
    /// [`Error::Data`] if an example has no label.
    pub fn analyze<D: Dataset + ?Sized>(dataset: &D) -> Result<ImbalanceReport> {
        if dataset.is_empty() {
            return Err(Error::EmptyDataset);
        }
        Ok(Self::analyze_labels(&dataset.try_labels()?))
    }

    /// Analyze a raw label sequence
    pub fn analyze_labels(labels: &[usize]) -> ImbalanceReport {
        ImbalanceReport::from_distribution(ClassDistribution::from_labels(labels))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::float_cmp)]
mod tests {
    use super::*;
    use crate::{dataset::ArrowImageDataset, tensor::Image};

    #[test]
    fn test_severity_from_ratio() {
        assert_eq!(ImbalanceSeverity::from_ratio(1.0), ImbalanceSeverity::None);
        assert_eq!(ImbalanceSeverity::from_ratio(1.5), ImbalanceSeverity::Low);
        assert_eq!(
            ImbalanceSeverity::from_ratio(3.0),
            ImbalanceSeverity::Moderate
        );
        assert_eq!(
            ImbalanceSeverity::from_ratio(10.0),
            ImbalanceSeverity::Severe
        );
        assert_eq!(
            ImbalanceSeverity::from_ratio(100.0),
            ImbalanceSeverity::Extreme
        );
    }

    #[test]
    fn test_severity_description() {
        assert_eq!(ImbalanceSeverity::None.description(), "Balanced");
        assert!(ImbalanceSeverity::Severe.is_imbalanced());
    }

    #[test]
    fn test_distribution_sum_equals_total() {
        let labels = vec![0, 0, 0, 1, 2, 2, 5];
        let dist = ClassDistribution::from_labels(&labels);
        assert_eq!(dist.counts.values().sum::<usize>(), dist.total);
        assert_eq!(dist.num_classes(), 4);
        assert_eq!(dist.get_count(0), 3);
        assert_eq!(dist.get_count(3), 0);
        assert_eq!(dist.majority_class(), Some(0));
        assert_eq!(dist.minority_class(), Some(1));
        assert!(!dist.is_uniform());
    }

    #[test]
    fn test_distribution_proportion() {
        let dist = ClassDistribution::from_labels(&[0, 1, 1, 1]);
        assert!((dist.get_proportion(1) - 0.75).abs() < 1e-12);
        assert_eq!(ClassDistribution::from_labels(&[]).get_proportion(0), 0.0);
    }

    #[test]
    fn test_metrics_balanced() {
        let report = ImbalanceDetector::analyze_labels(&[0, 1, 2, 0, 1, 2]);
        assert!(!report.is_imbalanced());
        assert!((report.metrics.normalized_entropy - 1.0).abs() < 1e-9);
        assert_eq!(report.metrics.imbalance_ratio, 1.0);
    }

    #[test]
    fn test_metrics_imbalanced() {
        let mut labels = vec![0; 90];
        labels.extend(vec![1; 10]);
        let report = ImbalanceDetector::analyze_labels(&labels);
        assert_eq!(report.severity(), ImbalanceSeverity::Moderate);
        assert!((report.metrics.imbalance_ratio - 9.0).abs() < 1e-9);
    }

    #[test]
    fn test_metrics_single_class() {
        let report = ImbalanceDetector::analyze_labels(&[4, 4, 4]);
        assert_eq!(report.metrics.normalized_entropy, 1.0);
        assert!(!report.is_imbalanced());
    }

    #[test]
    fn test_detector_on_dataset() {
        let images = vec![Image::zeros([1, 1, 1]); 4];
        let dataset = ArrowImageDataset::from_images(&images, &[0, 0, 0, 1]).unwrap();
        let report = ImbalanceDetector::analyze(&dataset).unwrap();
        assert_eq!(report.distribution.get_count(0), 3);
        assert_eq!(report.severity(), ImbalanceSeverity::Moderate);
    }
}
