//! AdamW optimizer (Adam with decoupled Weight decay)

use ndarray::Array2;

use super::Optimizer;
use crate::autograd::Tensor;

/// AdamW optimizer
///
/// Weight decay is applied to the parameters directly rather than folded
/// into the gradient:
///
/// θ_t = (1 - lr * λ) * θ_{t-1} - lr_t * m_t / (√v_t + ε)
#[derive(Debug)]
pub struct AdamW {
    lr: f32,
    beta1: f32,
    beta2: f32,
    epsilon: f32,
    weight_decay: f32,
    t: u64,
    m: Vec<Option<Array2<f32>>>,
    v: Vec<Option<Array2<f32>>>,
}

impl AdamW {
    /// Create a new AdamW optimizer
    pub fn new(lr: f32, beta1: f32, beta2: f32, epsilon: f32, weight_decay: f32) -> Self {
        Self {
            lr,
            beta1,
            beta2,
            epsilon,
            weight_decay,
            t: 0,
            m: Vec::new(),
            v: Vec::new(),
        }
    }

    /// Create AdamW with default parameters (weight_decay = 0.01)
    pub fn default_params(lr: f32) -> Self {
        Self::new(lr, 0.9, 0.999, 1e-8, 0.01)
    }

    /// Weight decay coefficient
    pub fn weight_decay(&self) -> f32 {
        self.weight_decay
    }
}

impl Optimizer for AdamW {
    fn step(&mut self, params: &[Tensor]) {
        if self.m.len() != params.len() {
            self.m = params.iter().map(|_| None).collect();
            self.v = params.iter().map(|_| None).collect();
        }
        self.t += 1;

        // Bias correction folded into the step size
        let t = i32::try_from(self.t).unwrap_or(i32::MAX);
        let lr_t = self.lr * (1.0 - self.beta2.powi(t)).sqrt() / (1.0 - self.beta1.powi(t));

        for (i, param) in params.iter().enumerate() {
            let Some(grad) = param.grad() else {
                continue;
            };

            let m = match self.m[i].take() {
                Some(m) => m * self.beta1 + &(&grad * (1.0 - self.beta1)),
                None => &grad * (1.0 - self.beta1),
            };
            let grad_sq = grad.mapv(|g| g * g);
            let v = match self.v[i].take() {
                Some(v) => v * self.beta2 + &(grad_sq * (1.0 - self.beta2)),
                None => grad_sq * (1.0 - self.beta2),
            };

            let update = &m / &v.mapv(|x| x.sqrt() + self.epsilon);
            let mut data = param.data_mut();
            data.mapv_inplace(|x| x * (1.0 - self.lr * self.weight_decay));
            data.scaled_add(-lr_t, &update);
            drop(data);

            self.m[i] = Some(m);
            self.v[i] = Some(v);
        }
    }

    fn steps(&self) -> u64 {
        self.t
    }

    fn lr(&self) -> f32 {
        self.lr
    }

    fn set_lr(&mut self, lr: f32) {
        self.lr = lr;
    }
}
