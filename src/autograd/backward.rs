//! Backward pass over the recorded graph

use std::collections::HashSet;

use ndarray::Array2;

use super::Tensor;

/// Gradient function of one recorded op.
pub trait BackwardOp {
    /// Reads the gradient of the op's output and accumulates the input
    /// gradients. Must not recurse into the inputs.
    fn backward(&self);

    /// Tensors the op was applied to.
    fn inputs(&self) -> Vec<Tensor>;
}

/// Nodes reachable from `root`, inputs before the ops that consume them.
fn topological_order(root: &Tensor) -> Vec<Tensor> {
    let mut order = Vec::new();
    let mut visited = HashSet::new();
    let mut stack = vec![(root.clone(), false)];

    while let Some((node, finished)) = stack.pop() {
        if finished {
            order.push(node);
            continue;
        }
        if !visited.insert(node.node_id()) {
            continue;
        }
        let op = node.backward_op();
        stack.push((node, true));
        if let Some(op) = op {
            for input in op.inputs() {
                if !visited.contains(&input.node_id()) {
                    stack.push((input, false));
                }
            }
        }
    }
    order
}

/// Perform backward pass on a tensor
///
/// Seeds `tensor` with `grad_output` (ones when `None`) and runs every op
/// reachable from it exactly once, in reverse topological order, so a node
/// used along several paths receives the full sum before it propagates.
pub fn backward(tensor: &Tensor, grad_output: Option<Array2<f32>>) {
    let seed = grad_output.unwrap_or_else(|| Array2::ones(tensor.shape()));
    tensor.set_grad(seed);

    for node in topological_order(tensor).iter().rev() {
        if let Some(op) = node.backward_op() {
            op.backward();
        }
    }
}
