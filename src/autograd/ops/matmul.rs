//! Matrix multiplication autograd operation

use std::rc::Rc;

use crate::{
    autograd::{BackwardOp, GradCell, Tensor},
    error::{Error, Result},
};

/// Matrix multiplication: `[m, k] x [k, n] -> [m, n]`
///
/// # Errors
///
/// Returns [`Error::ShapeMismatch`] if the inner dimensions differ.
pub fn matmul(a: &Tensor, b: &Tensor) -> Result<Tensor> {
    let (m, k) = a.shape();
    let (k2, n) = b.shape();
    if k != k2 {
        return Err(Error::shape(format!(
            "matmul: cannot multiply {m}x{k} by {k2}x{n}"
        )));
    }

    let data = a.data().dot(&*b.data());
    let requires_grad = a.requires_grad() || b.requires_grad();

    let mut result = Tensor::new(data, requires_grad);

    if requires_grad {
        let backward_op = Rc::new(MatmulBackward {
            a: a.clone(),
            b: b.clone(),
            result_grad: result.grad_cell(),
        });
        result.set_backward_op(backward_op);
    }

    Ok(result)
}

struct MatmulBackward {
    a: Tensor,
    b: Tensor,
    result_grad: GradCell,
}

impl BackwardOp for MatmulBackward {
    fn backward(&self) {
        if let Some(grad) = self.result_grad.borrow().as_ref() {
            if self.a.requires_grad() {
                // ∂L/∂A = ∂L/∂C @ B^T
                let grad_a = grad.dot(&self.b.data().t());
                self.a.accumulate_grad(grad_a);
            }
            if self.b.requires_grad() {
                // ∂L/∂B = A^T @ ∂L/∂C
                let grad_b = self.a.data().t().dot(grad);
                self.b.accumulate_grad(grad_b);
            }
        }
    }

    fn inputs(&self) -> Vec<Tensor> {
        vec![self.a.clone(), self.b.clone()]
    }
}
