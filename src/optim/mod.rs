//! Optimizers for finetuning encoder parameters

mod adamw;
mod optimizer;
mod sgd;

pub use adamw::AdamW;
pub use optimizer::{Optimizer, OptimizerKind};
pub use sgd::Sgd;
