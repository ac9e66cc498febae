//! Autograd operations with backward passes
//!
//! This module provides differentiable operations for automatic differentiation.

mod basic;
mod loss;
mod matmul;
mod normalize;
mod reduce;

pub use basic::{add, add_bias, detach, scale, sub};
pub use loss::cross_entropy;
pub use matmul::matmul;
pub use normalize::{l2_normalize, softmax, softmax_rows};
pub use reduce::{group_batch_size, group_max, group_mean};
pub(crate) use reduce::{group_max_array, group_mean_array};
