//! Stochastic Gradient Descent optimizer

use ndarray::Array2;

use super::Optimizer;
use crate::autograd::Tensor;

/// SGD optimizer with optional momentum
#[derive(Debug)]
pub struct Sgd {
    lr: f32,
    momentum: f32,
    velocities: Vec<Option<Array2<f32>>>,
    steps: u64,
}

impl Sgd {
    /// Create a new SGD optimizer
    pub fn new(lr: f32, momentum: f32) -> Self {
        Self {
            lr,
            momentum,
            velocities: Vec::new(),
            steps: 0,
        }
    }

    /// Momentum coefficient
    pub fn momentum(&self) -> f32 {
        self.momentum
    }
}

impl Optimizer for Sgd {
    fn step(&mut self, params: &[Tensor]) {
        if self.velocities.len() != params.len() {
            self.velocities = params.iter().map(|_| None).collect();
        }
        self.steps += 1;

        for (param, slot) in params.iter().zip(self.velocities.iter_mut()) {
            let Some(grad) = param.grad() else {
                continue;
            };
            if self.momentum > 0.0 {
                // v = momentum * v + grad, param -= lr * v
                let velocity = match slot.take() {
                    Some(v) => v * self.momentum + &grad,
                    None => grad,
                };
                param.data_mut().scaled_add(-self.lr, &velocity);
                *slot = Some(velocity);
            } else {
                param.data_mut().scaled_add(-self.lr, &grad);
            }
        }
    }

    fn steps(&self) -> u64 {
        self.steps
    }

    fn lr(&self) -> f32 {
        self.lr
    }

    fn set_lr(&mut self, lr: f32) {
        self.lr = lr;
    }
}
