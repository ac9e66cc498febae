//! Random over- and under-sampling of class-labeled index sets.
//!
//! Resampling works on indices only: it takes the label of every dataset
//! index and returns a sequence of indices whose per-class counts are equal.
//! The seed is fixed by default so a given label sequence always resamples
//! to the same index multiset.
//!
//! # Example
//!
//! ```
//! use equitune::resample::{resample_indices, ResamplePolicy, BALANCE_SEED};
//!
//! # fn main() -> equitune::Result<()> {
//! let labels = [0, 0, 0, 1];
//! let indices = resample_indices(&labels, ResamplePolicy::Oversample, BALANCE_SEED)?;
//! assert_eq!(indices.len(), 6);
//!
//! let indices = resample_indices(&labels, ResamplePolicy::Undersample, BALANCE_SEED)?;
//! assert_eq!(indices.len(), 2);
//! # Ok(())
//! # }
//! ```

use std::{collections::BTreeMap, fmt, str::FromStr};

use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Seed used for every balanced loader so that runs are reproducible.
pub const BALANCE_SEED: u64 = 42;

/// How to equalize class frequencies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResamplePolicy {
    /// Duplicate minority-class indices up to the majority count.
    Oversample,
    /// Drop majority-class indices down to the minority count.
    Undersample,
}

impl ResamplePolicy {
    /// Parses an optional policy where `""` and `"none"` mean no resampling.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnsupportedPolicy`] for any other unknown name.
    pub fn parse_optional(name: &str) -> Result<Option<Self>> {
        match name.trim().to_ascii_lowercase().as_str() {
            "" | "none" => Ok(None),
            _ => name.parse().map(Some),
        }
    }

    /// Returns the canonical lowercase name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Oversample => "oversample",
            Self::Undersample => "undersample",
        }
    }
}

impl FromStr for ResamplePolicy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "oversample" => Ok(Self::Oversample),
            "undersample" => Ok(Self::Undersample),
            _ => Err(Error::UnsupportedPolicy {
                name: s.to_string(),
            }),
        }
    }
}

impl fmt::Display for ResamplePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Configurable resampler over label sequences.
#[derive(Debug, Clone, Copy)]
pub struct Resampler {
    policy: ResamplePolicy,
    seed: u64,
}

impl Resampler {
    /// Creates a resampler seeded with [`BALANCE_SEED`].
    pub fn new(policy: ResamplePolicy) -> Self {
        Self {
            policy,
            seed: BALANCE_SEED,
        }
    }

    /// Overrides the seed.
    #[must_use]
    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Returns the policy.
    pub fn policy(&self) -> ResamplePolicy {
        self.policy
    }

    /// Computes the resampled index sequence for `labels`.
    ///
    /// Oversampling keeps every original index (in order) and appends, per
    /// class in ascending class order, indices drawn with replacement until
    /// the class reaches the majority count. Undersampling draws
    /// `min_count` indices per class without replacement and returns them
    /// grouped by ascending class, ascending within a class.
    ///
    /// # Errors
    ///
    /// Returns [`Error::EmptyDataset`] if `labels` is empty.
    pub fn fit_resample(&self, labels: &[usize]) -> Result<Vec<usize>> {
        if labels.is_empty() {
            return Err(Error::EmptyDataset);
        }

        let mut by_class: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
        for (index, &label) in labels.iter().enumerate() {
            by_class.entry(label).or_default().push(index);
        }

        let mut rng = rand::rngs::StdRng::seed_from_u64(self.seed);
        match self.policy {
            ResamplePolicy::Oversample => {
                let target = by_class.values().map(Vec::len).max().unwrap_or(0);
                let mut indices: Vec<usize> = (0..labels.len()).collect();
                for members in by_class.values() {
                    for _ in members.len()..target {
                        indices.push(members[rng.gen_range(0..members.len())]);
                    }
                }
                Ok(indices)
            }
            ResamplePolicy::Undersample => {
                let target = by_class.values().map(Vec::len).min().unwrap_or(0);
                let mut indices = Vec::with_capacity(target * by_class.len());
                for members in by_class.values() {
                    let mut picked: Vec<usize> =
                        rand::seq::index::sample(&mut rng, members.len(), target)
                            .into_iter()
                            .map(|i| members[i])
                            .collect();
                    picked.sort_unstable();
                    indices.extend(picked);
                }
                Ok(indices)
            }
        }
    }
}

/// Resamples `labels` with `policy` and `seed`.
///
/// # Errors
///
/// Returns [`Error::EmptyDataset`] if `labels` is empty.
pub fn resample_indices(labels: &[usize], policy: ResamplePolicy, seed: u64) -> Result<Vec<usize>> {
    Resampler::new(policy).seed(seed).fit_resample(labels)
}
