//! Tensor type with gradient tracking

use std::{
    cell::{Ref, RefCell, RefMut},
    fmt,
    rc::Rc,
};

use ndarray::Array2;

use super::BackwardOp;
use crate::error::{Error, Result};

/// Shared gradient slot of a tensor.
pub type GradCell = Rc<RefCell<Option<Array2<f32>>>>;

/// A 2-D tensor node in the autograd graph.
///
/// Cloning is shallow: clones share data and gradient storage, so an
/// optimizer can update a parameter through any of its handles.
#[derive(Clone)]
pub struct Tensor {
    data: Rc<RefCell<Array2<f32>>>,
    grad: GradCell,
    backward_op: Option<Rc<dyn BackwardOp>>,
    requires_grad: bool,
}

impl Tensor {
    /// Create a new tensor
    pub fn new(data: Array2<f32>, requires_grad: bool) -> Self {
        Self {
            data: Rc::new(RefCell::new(data)),
            grad: Rc::new(RefCell::new(None)),
            backward_op: None,
            requires_grad,
        }
    }

    /// Create a `[rows, cols]` tensor from a row-major vector
    ///
    /// # Errors
    ///
    /// Returns [`Error::ShapeMismatch`] if `data.len() != rows * cols`.
    pub fn from_vec(data: Vec<f32>, rows: usize, cols: usize, requires_grad: bool) -> Result<Self> {
        let len = data.len();
        let array = Array2::from_shape_vec((rows, cols), data).map_err(|_| {
            Error::shape(format!("{len} values cannot fill a {rows}x{cols} tensor"))
        })?;
        Ok(Self::new(array, requires_grad))
    }

    /// Create a zero-filled tensor
    pub fn zeros(rows: usize, cols: usize, requires_grad: bool) -> Self {
        Self::new(Array2::zeros((rows, cols)), requires_grad)
    }

    /// Borrow the data
    pub fn data(&self) -> Ref<'_, Array2<f32>> {
        self.data.borrow()
    }

    /// Mutably borrow the data
    pub fn data_mut(&self) -> RefMut<'_, Array2<f32>> {
        self.data.borrow_mut()
    }

    /// `(rows, cols)`
    pub fn shape(&self) -> (usize, usize) {
        self.data.borrow().dim()
    }

    /// Number of rows
    pub fn rows(&self) -> usize {
        self.shape().0
    }

    /// Number of columns
    pub fn cols(&self) -> usize {
        self.shape().1
    }

    /// Total number of elements
    pub fn len(&self) -> usize {
        self.data.borrow().len()
    }

    /// True for a tensor with no elements
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// First element, the value of a scalar loss
    pub fn item(&self) -> f32 {
        self.data.borrow().iter().next().copied().unwrap_or(0.0)
    }

    /// Whether gradients flow into this tensor
    pub fn requires_grad(&self) -> bool {
        self.requires_grad
    }

    /// Copy of the accumulated gradient, if any
    pub fn grad(&self) -> Option<Array2<f32>> {
        self.grad.borrow().clone()
    }

    /// Shared gradient slot, handed to the op that produced this tensor
    pub fn grad_cell(&self) -> GradCell {
        Rc::clone(&self.grad)
    }

    /// Overwrite the gradient
    pub fn set_grad(&self, grad: Array2<f32>) {
        *self.grad.borrow_mut() = Some(grad);
    }

    /// Add `grad` into the accumulated gradient
    pub fn accumulate_grad(&self, grad: Array2<f32>) {
        let mut slot = self.grad.borrow_mut();
        match slot.as_mut() {
            Some(existing) => *existing += &grad,
            None => *slot = Some(grad),
        }
    }

    /// Clear the gradient
    pub fn zero_grad(&self) {
        *self.grad.borrow_mut() = None;
    }

    /// Op that produced this tensor
    pub fn backward_op(&self) -> Option<Rc<dyn BackwardOp>> {
        self.backward_op.clone()
    }

    /// Attach the producing op
    pub fn set_backward_op(&mut self, op: Rc<dyn BackwardOp>) {
        self.backward_op = Some(op);
    }

    /// Stable identity of the node, shared by all clones
    pub(crate) fn node_id(&self) -> usize {
        Rc::as_ptr(&self.grad) as usize
    }
}

impl fmt::Debug for Tensor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tensor")
            .field("shape", &self.shape())
            .field("requires_grad", &self.requires_grad)
            .field("has_grad", &self.grad.borrow().is_some())
            .finish()
    }
}
