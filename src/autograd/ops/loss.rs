//! Cross-entropy loss over integer class targets

use std::rc::Rc;

use ndarray::Array2;

use super::normalize::softmax_rows;
use crate::{
    autograd::{BackwardOp, GradCell, Tensor},
    error::{Error, Result},
};

/// Mean cross-entropy of `logits` (`[batch, classes]`) against `targets`
///
/// Returns a `[1, 1]` tensor.
///
/// # Errors
///
/// Returns [`Error::ShapeMismatch`] if `targets.len()` differs from the row
/// count or a target is not a valid class index.
pub fn cross_entropy(logits: &Tensor, targets: &[usize]) -> Result<Tensor> {
    let (batch, classes) = logits.shape();
    if targets.len() != batch || batch == 0 {
        return Err(Error::shape(format!(
            "cross_entropy: {} targets for {batch} rows",
            targets.len()
        )));
    }
    if let Some(&bad) = targets.iter().find(|&&t| t >= classes) {
        return Err(Error::shape(format!(
            "cross_entropy: target {bad} out of range for {classes} classes"
        )));
    }

    let probs = softmax_rows(&logits.data());
    #[allow(clippy::cast_precision_loss)]
    let n = batch as f32;
    let loss = targets
        .iter()
        .enumerate()
        .map(|(i, &t)| -probs[[i, t]].max(f32::MIN_POSITIVE).ln())
        .sum::<f32>()
        / n;

    let requires_grad = logits.requires_grad();
    let mut result = Tensor::new(Array2::from_elem((1, 1), loss), requires_grad);

    if requires_grad {
        let backward_op = Rc::new(CrossEntropyBackward {
            logits: logits.clone(),
            probs,
            targets: targets.to_vec(),
            result_grad: result.grad_cell(),
        });
        result.set_backward_op(backward_op);
    }

    Ok(result)
}

struct CrossEntropyBackward {
    logits: Tensor,
    probs: Array2<f32>,
    targets: Vec<usize>,
    result_grad: GradCell,
}

impl BackwardOp for CrossEntropyBackward {
    fn backward(&self) {
        if let Some(grad) = self.result_grad.borrow().as_ref() {
            if self.logits.requires_grad() {
                // ∂L/∂z = (softmax(z) - onehot(t)) / batch
                let upstream = grad.iter().next().copied().unwrap_or(1.0);
                let mut grad_z = self.probs.clone();
                for (i, &t) in self.targets.iter().enumerate() {
                    grad_z[[i, t]] -= 1.0;
                }
                #[allow(clippy::cast_precision_loss)]
                let n = self.targets.len() as f32;
                self.logits.accumulate_grad(grad_z * (upstream / n));
            }
        }
    }

    fn inputs(&self) -> Vec<Tensor> {
        vec![self.logits.clone()]
    }
}
