//! Row-wise normalization: l2_normalize, softmax

use std::rc::Rc;

use ndarray::{Array1, Array2, Axis};

use crate::autograd::{BackwardOp, GradCell, Tensor};

const NORM_EPSILON: f32 = 1e-12;

/// Divide every row by its L2 norm
///
/// All-zero rows stay zero.
pub fn l2_normalize(a: &Tensor) -> Tensor {
    let norms: Array1<f32> = a
        .data()
        .map_axis(Axis(1), |row| row.dot(&row).sqrt().max(NORM_EPSILON));
    let data = &*a.data() / &norms.view().insert_axis(Axis(1));
    let requires_grad = a.requires_grad();

    let mut result = Tensor::new(data.clone(), requires_grad);

    if requires_grad {
        let backward_op = Rc::new(L2NormalizeBackward {
            a: a.clone(),
            normalized: data,
            norms,
            result_grad: result.grad_cell(),
        });
        result.set_backward_op(backward_op);
    }

    result
}

struct L2NormalizeBackward {
    a: Tensor,
    normalized: Array2<f32>,
    norms: Array1<f32>,
    result_grad: GradCell,
}

impl BackwardOp for L2NormalizeBackward {
    fn backward(&self) {
        if let Some(grad) = self.result_grad.borrow().as_ref() {
            if self.a.requires_grad() {
                // ∂L/∂x = (g - y * <g, y>) / ||x||
                let projection = (grad * &self.normalized).sum_axis(Axis(1));
                let tangent = grad - &(&self.normalized * &projection.insert_axis(Axis(1)));
                let grad_a = tangent / &self.norms.view().insert_axis(Axis(1));
                self.a.accumulate_grad(grad_a);
            }
        }
    }

    fn inputs(&self) -> Vec<Tensor> {
        vec![self.a.clone()]
    }
}

/// Numerically stable softmax of every row
pub fn softmax(a: &Tensor) -> Tensor {
    let data = softmax_rows(&a.data());
    let requires_grad = a.requires_grad();

    let mut result = Tensor::new(data.clone(), requires_grad);

    if requires_grad {
        let backward_op = Rc::new(SoftmaxBackward {
            a: a.clone(),
            output: data,
            result_grad: result.grad_cell(),
        });
        result.set_backward_op(backward_op);
    }

    result
}

/// Softmax of every row of a plain array
pub fn softmax_rows(x: &Array2<f32>) -> Array2<f32> {
    let mut out = x.clone();
    for mut row in out.rows_mut() {
        let max = row.fold(f32::NEG_INFINITY, |m, &v| m.max(v));
        row.mapv_inplace(|v| (v - max).exp());
        let sum = row.sum();
        row.mapv_inplace(|v| v / sum);
    }
    out
}

struct SoftmaxBackward {
    a: Tensor,
    output: Array2<f32>,
    result_grad: GradCell,
}

impl BackwardOp for SoftmaxBackward {
    fn backward(&self) {
        if let Some(grad) = self.result_grad.borrow().as_ref() {
            if self.a.requires_grad() {
                // ∂L/∂x = y * (g - <g, y>)
                let dot = (grad * &self.output).sum_axis(Axis(1));
                let grad_a = &self.output * &(grad - &dot.insert_axis(Axis(1)));
                self.a.accumulate_grad(grad_a);
            }
        }
    }

    fn inputs(&self) -> Vec<Tensor> {
        vec![self.a.clone()]
    }
}
