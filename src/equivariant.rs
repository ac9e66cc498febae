//! Group-equivariant output reduction.
//!
//! Logits for a group-expanded batch have shape `[group_size * batch,
//! classes]`, group-major. Reducing over the group axis makes the prediction
//! invariant to the group action:
//!
//! - equitune averages the copies,
//! - equizero takes the per-class maximum but backpropagates as the average.

use std::{fmt, str::FromStr};

use ndarray::Array2;
use serde::{Deserialize, Serialize};

use crate::{
    autograd::{
        add, detach, group_batch_size, group_max, group_max_array, group_mean, group_mean_array,
        sub, Tensor,
    },
    error::{Error, Result},
};

/// How per-copy logits are pooled over the group axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Reduction {
    /// Average over group copies.
    Mean,
    /// Element-wise maximum over group copies.
    Max,
}

impl FromStr for Reduction {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "mean" => Ok(Self::Mean),
            "max" => Ok(Self::Max),
            _ => Err(Error::UnknownMethod {
                name: s.to_string(),
            }),
        }
    }
}

/// Finetuning objective applied to the per-copy logits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Method {
    /// Mean over the group.
    #[default]
    Equitune,
    /// Value of the group max, gradient of the group mean.
    Equizero,
    /// Raw logits; no group reduction.
    None,
}

impl Method {
    /// Canonical name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Equitune => "equitune",
            Self::Equizero => "equizero",
            Self::None => "none",
        }
    }

    /// Reduction used at inference time.
    pub fn inference_reduction(&self) -> Option<Reduction> {
        match self {
            Self::Equitune => Some(Reduction::Mean),
            Self::Equizero => Some(Reduction::Max),
            Self::None => None,
        }
    }
}

impl FromStr for Method {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "equitune" => Ok(Self::Equitune),
            "equizero" => Ok(Self::Equizero),
            "" | "none" => Ok(Self::None),
            _ => Err(Error::UnknownMethod {
                name: s.to_string(),
            }),
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Reduces group-major `logits` to one row per example.
///
/// # Errors
///
/// Returns [`Error::GroupShapeMismatch`] if `group_size` is zero or does not
/// divide the row count.
pub fn get_output(logits: &Tensor, group_size: usize, reduction: Reduction) -> Result<Tensor> {
    match reduction {
        Reduction::Mean => group_mean(logits, group_size),
        Reduction::Max => group_max(logits, group_size),
    }
}

/// Applies `method` to group-major `logits`.
///
/// For [`Method::Equizero`] the result is `mean + detach(max - mean)`: its
/// value equals the group max while its gradient is the group mean's.
///
/// # Errors
///
/// Returns [`Error::GroupShapeMismatch`] if the rows don't split into
/// `group_size` copies. [`Method::None`] checks nothing.
pub fn apply_method(logits: &Tensor, group_size: usize, method: Method) -> Result<Tensor> {
    match method {
        Method::Equitune => get_output(logits, group_size, Reduction::Mean),
        Method::Equizero => {
            let mean = get_output(logits, group_size, Reduction::Mean)?;
            let max = get_output(logits, group_size, Reduction::Max)?;
            add(&mean, &detach(&sub(&max, &mean)?))
        }
        Method::None => Ok(logits.clone()),
    }
}

/// Gradient-free group reduction on a plain array.
///
/// # Errors
///
/// Returns [`Error::GroupShapeMismatch`] if the rows don't split evenly.
pub fn reduce_group(
    logits: &Array2<f32>,
    group_size: usize,
    reduction: Reduction,
) -> Result<Array2<f32>> {
    let batch = group_batch_size(logits.nrows(), group_size)?;
    Ok(match reduction {
        Reduction::Mean => group_mean_array(logits, group_size, batch),
        Reduction::Max => group_max_array(logits, group_size, batch).0,
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use approx::assert_abs_diff_eq;
    use ndarray::array;
    use proptest::prelude::*;

    use super::*;
    use crate::autograd::{backward, cross_entropy};

    #[test]
    fn test_parse_method() {
        assert_eq!("equizero".parse::<Method>().unwrap(), Method::Equizero);
        assert_eq!("none".parse::<Method>().unwrap(), Method::None);
        assert!(matches!(
            "equimax".parse::<Method>(),
            Err(Error::UnknownMethod { .. })
        ));
        assert_eq!("MAX".parse::<Reduction>().unwrap(), Reduction::Max);
    }

    #[test]
    fn test_max_reduction_literal() {
        let logits = Tensor::from_vec(vec![1.0, 0.0, 0.0, 0.0, 5.0, 0.0], 2, 3, false).unwrap();
        let out = get_output(&logits, 2, Reduction::Max).unwrap();
        assert_eq!(*out.data(), array![[0.0f32, 5.0, 0.0]]);
    }

    #[test]
    fn test_uneven_rows_fail_fast() {
        let logits = Tensor::zeros(5, 3, true);
        for reduction in [Reduction::Mean, Reduction::Max] {
            assert!(matches!(
                get_output(&logits, 2, reduction),
                Err(Error::GroupShapeMismatch { .. })
            ));
        }
        assert!(apply_method(&logits, 4, Method::Equizero).is_err());
        assert!(reduce_group(&Array2::zeros((5, 3)), 2, Reduction::Mean).is_err());
    }

    #[test]
    fn test_batch_order_preserved() {
        // G = 2, B = 3, C = 1; example i scores i in copy 0 and 10 + i in copy 1
        let logits = array![[0.0f32], [1.0], [2.0], [10.0], [11.0], [12.0]];
        let mean = reduce_group(&logits, 2, Reduction::Mean).unwrap();
        assert_eq!(mean, array![[5.0f32], [6.0], [7.0]]);
        let max = reduce_group(&logits, 2, Reduction::Max).unwrap();
        assert_eq!(max, array![[10.0f32], [11.0], [12.0]]);
    }

    #[test]
    fn test_equizero_value_is_max_gradient_is_mean() {
        let values = vec![0.3, -1.2, 2.0, 0.7, 1.1, 0.4, -0.5, 0.9, 1.8, 0.0, -0.3, 0.6];
        let targets = [2, 0];

        let zero_logits = Tensor::from_vec(values.clone(), 4, 3, true).unwrap();
        let zero = apply_method(&zero_logits, 2, Method::Equizero).unwrap();
        let max = reduce_group(&zero_logits.data(), 2, Reduction::Max).unwrap();
        for (a, b) in zero.data().iter().zip(max.iter()) {
            assert_abs_diff_eq!(*a, *b, epsilon = 1e-6);
        }

        // same upstream gradient into both reductions
        let upstream = array![[0.5f32, -1.0, 2.0], [1.5, 0.25, -0.75]];
        backward(&zero, Some(upstream.clone()));

        let mean_logits = Tensor::from_vec(values, 4, 3, true).unwrap();
        let mean = apply_method(&mean_logits, 2, Method::Equitune).unwrap();
        backward(&mean, Some(upstream));

        let zero_grad = zero_logits.grad().unwrap();
        let mean_grad = mean_logits.grad().unwrap();
        for (a, b) in zero_grad.iter().zip(mean_grad.iter()) {
            assert_abs_diff_eq!(*a, *b, epsilon = 1e-6);
        }

        // the blend also composes with the loss
        zero_logits.zero_grad();
        let zero = apply_method(&zero_logits, 2, Method::Equizero).unwrap();
        backward(&cross_entropy(&zero, &targets).unwrap(), None);
        assert!(zero_logits.grad().is_some());
    }

    #[test]
    fn test_none_passthrough() {
        let logits = Tensor::zeros(3, 2, false);
        let out = apply_method(&logits, 7, Method::None).unwrap();
        assert_eq!(out.shape(), (3, 2));
    }

    proptest! {
        #[test]
        fn prop_mean_of_tiled_row_is_that_row(
            row in prop::collection::vec(-50.0f32..50.0, 1..8),
            group_size in 1usize..6,
        ) {
            let cols = row.len();
            let tiled = Array2::from_shape_fn((group_size, cols), |(_, c)| row[c]);
            let out = reduce_group(&tiled, group_size, Reduction::Mean).unwrap();
            for (a, b) in out.iter().zip(&row) {
                prop_assert!((a - b).abs() <= 1e-3);
            }
        }

        #[test]
        fn prop_max_is_a_group_row_topping_the_mean(
            vals in prop::collection::vec(-5.0f32..5.0, 12),
        ) {
            let logits = Array2::from_shape_vec((4, 3), vals).unwrap();
            let mean = reduce_group(&logits, 2, Reduction::Mean).unwrap();
            let max = reduce_group(&logits, 2, Reduction::Max).unwrap();
            let top = |row: ndarray::ArrayView1<f32>| row.fold(f32::NEG_INFINITY, |a, &b| a.max(b));
            for i in 0..2 {
                let picked = max.row(i);
                prop_assert!(picked == logits.row(i) || picked == logits.row(2 + i));
                prop_assert!(top(picked) + 1e-5 >= top(mean.row(i)));
            }
        }
    }
}
