//! Basic autograd operations: add, sub, add_bias, scale, detach

use std::rc::Rc;

use ndarray::Axis;

use crate::{
    autograd::{BackwardOp, GradCell, Tensor},
    error::{Error, Result},
};

fn check_same_shape(op: &str, a: &Tensor, b: &Tensor) -> Result<()> {
    if a.shape() == b.shape() {
        Ok(())
    } else {
        Err(Error::shape(format!(
            "{op}: shapes {:?} and {:?} differ",
            a.shape(),
            b.shape()
        )))
    }
}

/// Add two tensors of the same shape
///
/// # Errors
///
/// Returns [`Error::ShapeMismatch`] if the shapes differ.
pub fn add(a: &Tensor, b: &Tensor) -> Result<Tensor> {
    check_same_shape("add", a, b)?;
    let data = &*a.data() + &*b.data();
    let requires_grad = a.requires_grad() || b.requires_grad();

    let mut result = Tensor::new(data, requires_grad);

    if requires_grad {
        let backward_op = Rc::new(AddBackward {
            a: a.clone(),
            b: b.clone(),
            negate_b: false,
            result_grad: result.grad_cell(),
        });
        result.set_backward_op(backward_op);
    }

    Ok(result)
}

/// Subtract `b` from `a` element-wise
///
/// # Errors
///
/// Returns [`Error::ShapeMismatch`] if the shapes differ.
pub fn sub(a: &Tensor, b: &Tensor) -> Result<Tensor> {
    check_same_shape("sub", a, b)?;
    let data = &*a.data() - &*b.data();
    let requires_grad = a.requires_grad() || b.requires_grad();

    let mut result = Tensor::new(data, requires_grad);

    if requires_grad {
        let backward_op = Rc::new(AddBackward {
            a: a.clone(),
            b: b.clone(),
            negate_b: true,
            result_grad: result.grad_cell(),
        });
        result.set_backward_op(backward_op);
    }

    Ok(result)
}

struct AddBackward {
    a: Tensor,
    b: Tensor,
    negate_b: bool,
    result_grad: GradCell,
}

impl BackwardOp for AddBackward {
    fn backward(&self) {
        if let Some(grad) = self.result_grad.borrow().as_ref() {
            if self.a.requires_grad() {
                self.a.accumulate_grad(grad.clone());
            }
            if self.b.requires_grad() {
                if self.negate_b {
                    self.b.accumulate_grad(-grad);
                } else {
                    self.b.accumulate_grad(grad.clone());
                }
            }
        }
    }

    fn inputs(&self) -> Vec<Tensor> {
        vec![self.a.clone(), self.b.clone()]
    }
}

/// Add a `[1, cols]` bias row to every row of `a`
///
/// # Errors
///
/// Returns [`Error::ShapeMismatch`] unless `bias` is `[1, a.cols()]`.
pub fn add_bias(a: &Tensor, bias: &Tensor) -> Result<Tensor> {
    if bias.shape() != (1, a.cols()) {
        return Err(Error::shape(format!(
            "add_bias: bias {:?} does not match {} columns",
            bias.shape(),
            a.cols()
        )));
    }
    let data = &*a.data() + &*bias.data();
    let requires_grad = a.requires_grad() || bias.requires_grad();

    let mut result = Tensor::new(data, requires_grad);

    if requires_grad {
        let backward_op = Rc::new(AddBiasBackward {
            a: a.clone(),
            bias: bias.clone(),
            result_grad: result.grad_cell(),
        });
        result.set_backward_op(backward_op);
    }

    Ok(result)
}

struct AddBiasBackward {
    a: Tensor,
    bias: Tensor,
    result_grad: GradCell,
}

impl BackwardOp for AddBiasBackward {
    fn backward(&self) {
        if let Some(grad) = self.result_grad.borrow().as_ref() {
            if self.a.requires_grad() {
                self.a.accumulate_grad(grad.clone());
            }
            if self.bias.requires_grad() {
                // ∂L/∂bias = column sums of ∂L/∂out
                self.bias.accumulate_grad(grad.sum_axis(Axis(0)).insert_axis(Axis(0)));
            }
        }
    }

    fn inputs(&self) -> Vec<Tensor> {
        vec![self.a.clone(), self.bias.clone()]
    }
}

/// Scale tensor by a scalar
pub fn scale(a: &Tensor, factor: f32) -> Tensor {
    let data = &*a.data() * factor;
    let requires_grad = a.requires_grad();

    let mut result = Tensor::new(data, requires_grad);

    if requires_grad {
        let backward_op = Rc::new(ScaleBackward {
            a: a.clone(),
            factor,
            result_grad: result.grad_cell(),
        });
        result.set_backward_op(backward_op);
    }

    result
}

struct ScaleBackward {
    a: Tensor,
    factor: f32,
    result_grad: GradCell,
}

impl BackwardOp for ScaleBackward {
    fn backward(&self) {
        if let Some(grad) = self.result_grad.borrow().as_ref() {
            if self.a.requires_grad() {
                // ∂L/∂a = ∂L/∂out * factor
                self.a.accumulate_grad(grad * self.factor);
            }
        }
    }

    fn inputs(&self) -> Vec<Tensor> {
        vec![self.a.clone()]
    }
}

/// Copy of `a` cut from the graph; no gradient flows back through it
pub fn detach(a: &Tensor) -> Tensor {
    Tensor::new(a.data().clone(), false)
}
