//! Reductions over the group axis of group-major rows
//!
//! A `[group_size * batch, cols]` tensor is read as `[group_size, batch,
//! cols]`: row `g * batch + i` holds example `i` under group element `g`.

use std::rc::Rc;

use ndarray::{s, Array2};

use crate::{
    autograd::{BackwardOp, GradCell, Tensor},
    error::{Error, Result},
};

/// Batch size implied by `rows` group-major rows.
///
/// # Errors
///
/// Returns [`Error::GroupShapeMismatch`] if `group_size` is zero or does not
/// divide `rows`.
pub fn group_batch_size(rows: usize, group_size: usize) -> Result<usize> {
    if group_size == 0 {
        return Err(Error::group_shape("group size must be at least 1"));
    }
    if rows % group_size != 0 {
        return Err(Error::group_shape(format!(
            "{rows} rows cannot be split into {group_size} group copies"
        )));
    }
    Ok(rows / group_size)
}

/// Mean over the group axis: `[G * B, C] -> [B, C]`
///
/// # Errors
///
/// Returns [`Error::GroupShapeMismatch`] if the rows don't split evenly.
pub fn group_mean(a: &Tensor, group_size: usize) -> Result<Tensor> {
    let batch = group_batch_size(a.rows(), group_size)?;
    let data = group_mean_array(&a.data(), group_size, batch);
    let requires_grad = a.requires_grad();

    let mut result = Tensor::new(data, requires_grad);

    if requires_grad {
        let backward_op = Rc::new(GroupMeanBackward {
            a: a.clone(),
            group_size,
            result_grad: result.grad_cell(),
        });
        result.set_backward_op(backward_op);
    }

    Ok(result)
}

pub(crate) fn group_mean_array(x: &Array2<f32>, group_size: usize, batch: usize) -> Array2<f32> {
    let mut out = Array2::zeros((batch, x.ncols()));
    for g in 0..group_size {
        out += &x.slice(s![g * batch..(g + 1) * batch, ..]);
    }
    #[allow(clippy::cast_precision_loss)]
    let n = group_size as f32;
    out / n
}

struct GroupMeanBackward {
    a: Tensor,
    group_size: usize,
    result_grad: GradCell,
}

impl BackwardOp for GroupMeanBackward {
    fn backward(&self) {
        if let Some(grad) = self.result_grad.borrow().as_ref() {
            if self.a.requires_grad() {
                // every copy receives 1/G of the output gradient
                #[allow(clippy::cast_precision_loss)]
                let share = grad / self.group_size as f32;
                let batch = share.nrows();
                let mut grad_a = Array2::zeros((batch * self.group_size, share.ncols()));
                for g in 0..self.group_size {
                    grad_a
                        .slice_mut(s![g * batch..(g + 1) * batch, ..])
                        .assign(&share);
                }
                self.a.accumulate_grad(grad_a);
            }
        }
    }

    fn inputs(&self) -> Vec<Tensor> {
        vec![self.a.clone()]
    }
}

/// Best group copy per example: `[G * B, C] -> [B, C]`
///
/// For each example the group copy whose top logit is largest is selected and
/// its whole row is returned; ties go to the lowest group element. The
/// gradient flows back to the selected row only.
///
/// # Errors
///
/// Returns [`Error::GroupShapeMismatch`] if the rows don't split evenly.
pub fn group_max(a: &Tensor, group_size: usize) -> Result<Tensor> {
    let batch = group_batch_size(a.rows(), group_size)?;
    let (data, selected) = group_max_array(&a.data(), group_size, batch);
    let requires_grad = a.requires_grad();

    let mut result = Tensor::new(data, requires_grad);

    if requires_grad {
        let backward_op = Rc::new(GroupMaxBackward {
            a: a.clone(),
            selected,
            result_grad: result.grad_cell(),
        });
        result.set_backward_op(backward_op);
    }

    Ok(result)
}

fn row_top(x: &Array2<f32>, row: usize) -> f32 {
    x.row(row).iter().copied().fold(f32::NEG_INFINITY, f32::max)
}

/// Returns the selected rows and, per example, the source row index.
pub(crate) fn group_max_array(
    x: &Array2<f32>,
    group_size: usize,
    batch: usize,
) -> (Array2<f32>, Vec<usize>) {
    let mut selected: Vec<usize> = (0..batch).collect();
    let mut best: Vec<f32> = (0..batch).map(|i| row_top(x, i)).collect();
    for g in 1..group_size {
        for (i, (best, selected)) in best.iter_mut().zip(&mut selected).enumerate() {
            let row = g * batch + i;
            let top = row_top(x, row);
            if top > *best {
                *best = top;
                *selected = row;
            }
        }
    }
    let mut out = Array2::zeros((batch, x.ncols()));
    for (i, &row) in selected.iter().enumerate() {
        out.row_mut(i).assign(&x.row(row));
    }
    (out, selected)
}

struct GroupMaxBackward {
    a: Tensor,
    selected: Vec<usize>,
    result_grad: GradCell,
}

impl BackwardOp for GroupMaxBackward {
    fn backward(&self) {
        if let Some(grad) = self.result_grad.borrow().as_ref() {
            if self.a.requires_grad() {
                let mut grad_a = Array2::zeros(self.a.shape());
                for (i, &row) in self.selected.iter().enumerate() {
                    let mut target = grad_a.row_mut(row);
                    target += &grad.row(i);
                }
                self.a.accumulate_grad(grad_a);
            }
        }
    }

    fn inputs(&self) -> Vec<Tensor> {
        vec![self.a.clone()]
    }
}
