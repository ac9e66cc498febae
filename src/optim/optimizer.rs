//! Optimizer trait

use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::{
    autograd::Tensor,
    error::{Error, Result},
};

/// Trait for optimization algorithms
///
/// Parameters are shared [`Tensor`] handles; updates write through to every
/// clone, so the encoder that owns them sees the new values.
pub trait Optimizer {
    /// Perform a single optimization step
    ///
    /// Parameters without a gradient are left untouched.
    fn step(&mut self, params: &[Tensor]);

    /// Zero out all gradients
    fn zero_grad(&mut self, params: &[Tensor]) {
        for param in params {
            param.zero_grad();
        }
    }

    /// Number of steps taken so far
    fn steps(&self) -> u64;

    /// Get learning rate
    fn lr(&self) -> f32;

    /// Set learning rate
    fn set_lr(&mut self, lr: f32);
}

/// Which optimizer a finetuning run uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OptimizerKind {
    /// SGD with momentum.
    #[default]
    Sgd,
    /// AdamW with default betas.
    AdamW,
}

impl OptimizerKind {
    /// Builds the optimizer.
    pub fn build(&self, lr: f32, momentum: f32, weight_decay: f32) -> Box<dyn Optimizer> {
        match self {
            Self::Sgd => Box::new(super::Sgd::new(lr, momentum)),
            Self::AdamW => Box::new(super::AdamW::new(lr, 0.9, 0.999, 1e-8, weight_decay)),
        }
    }
}

impl FromStr for OptimizerKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sgd" => Ok(Self::Sgd),
            "adamw" => Ok(Self::AdamW),
            other => Err(Error::invalid_config(format!("unknown optimizer '{other}'"))),
        }
    }
}

impl fmt::Display for OptimizerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Sgd => "sgd",
            Self::AdamW => "adamw",
        })
    }
}
