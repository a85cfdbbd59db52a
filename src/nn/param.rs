//! Trainable parameter with its gradient buffer

use ndarray::Array2;
use serde::{Deserialize, Serialize};

/// A parameter tensor and the gradient accumulated for it.
///
/// Vectors (biases, the cosine scale) are stored as single-row matrices so
/// every parameter shares one type and one optimizer code path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Param {
    pub value: Array2<f64>,
    #[serde(skip)]
    pub grad: Array2<f64>,
}

impl Param {
    pub fn new(value: Array2<f64>) -> Self {
        let grad = Array2::zeros(value.dim());
        Self { value, grad }
    }

    pub fn zeros(rows: usize, cols: usize) -> Self {
        Self::new(Array2::zeros((rows, cols)))
    }

    /// Add to the gradient buffer
    pub fn accumulate(&mut self, grad: &Array2<f64>) {
        if self.grad.dim() != self.value.dim() {
            self.grad = Array2::zeros(self.value.dim());
        }
        self.grad += grad;
    }

    pub fn zero_grad(&mut self) {
        if self.grad.dim() == self.value.dim() {
            self.grad.fill(0.0);
        } else {
            self.grad = Array2::zeros(self.value.dim());
        }
    }

    pub fn len(&self) -> usize {
        self.value.len()
    }

    pub fn is_empty(&self) -> bool {
        self.value.is_empty()
    }
}
