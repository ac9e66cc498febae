//! Tape-based autograd engine
//!
//! Each op records a [`BackwardOp`] on its output. [`backward`] walks the
//! recorded graph in reverse topological order, so tensors reused along
//! several paths (as in the equizero blend) accumulate their full gradient
//! before propagating it.
//!
//! Tensors are `Rc`-based and stay on the thread that built them.
//!
//! ```
//! use equitune::autograd::{backward, matmul, Tensor};
//!
//! # fn main() -> equitune::Result<()> {
//! let w = Tensor::from_vec(vec![1.0, 2.0], 2, 1, true)?;
//! let x = Tensor::from_vec(vec![3.0, 4.0], 1, 2, false)?;
//! let y = matmul(&x, &w)?;
//! backward(&y, None);
//! assert_eq!(w.grad().map(|g| g.into_raw_vec_and_offset().0), Some(vec![3.0, 4.0]));
//! # Ok(())
//! # }
//! ```

mod backward;
mod ops;
mod tensor;

#[cfg(test)]
mod tests;

pub use backward::{backward, BackwardOp};
pub use ops::*;
pub(crate) use ops::{group_max_array, group_mean_array};
pub use tensor::{GradCell, Tensor};
