//! Stochastic Gradient Descent
//!
//! Follows the usual deep-learning formulation:
//! - `g = grad + weight_decay * p`
//! - `v = momentum * v + g` (the first step seeds `v` with `g`)
//! - `p = p - lr * v`

use ndarray::Array2;

use super::param::Param;
use crate::config::TrainParams;
use crate::{IncrementalError, Result};

/// SGD with momentum and L2 weight decay.
///
/// Momentum buffers are tied to the order of the parameters passed to
/// [`Sgd::step`]; an optimizer is rebuilt whenever the parameter set changes.
#[derive(Debug, Clone)]
pub struct Sgd {
    pub learning_rate: f64,
    pub momentum: f64,
    pub weight_decay: f64,
    velocity: Vec<Option<Array2<f64>>>,
}

impl Sgd {
    pub fn new(learning_rate: f64) -> Self {
        Self {
            learning_rate,
            momentum: 0.0,
            weight_decay: 0.0,
            velocity: Vec::new(),
        }
    }

    pub fn with_momentum(mut self, momentum: f64) -> Self {
        self.momentum = momentum;
        self
    }

    pub fn with_weight_decay(mut self, weight_decay: f64) -> Self {
        self.weight_decay = weight_decay;
        self
    }

    /// Optimizer configured from the training parameters
    pub fn from_params(params: &TrainParams) -> Self {
        Self::new(params.learning_rate)
            .with_momentum(params.momentum)
            .with_weight_decay(params.weight_decay)
    }

    /// Apply one update using the accumulated gradients
    pub fn step(&mut self, params: Vec<&mut Param>) -> Result<()> {
        if self.velocity.is_empty() {
            self.velocity = vec![None; params.len()];
        } else if self.velocity.len() != params.len() {
            return Err(IncrementalError::ShapeMismatch(format!(
                "optimizer tracks {} parameters, got {}",
                self.velocity.len(),
                params.len()
            )));
        }

        for (param, velocity) in params.into_iter().zip(self.velocity.iter_mut()) {
            if param.grad.dim() != param.value.dim() {
                return Err(IncrementalError::ShapeMismatch(format!(
                    "gradient {:?} does not match parameter {:?}",
                    param.grad.dim(),
                    param.value.dim()
                )));
            }

            let mut update = &param.grad + &(&param.value * self.weight_decay);
            if self.momentum > 0.0 {
                let v = match velocity.take() {
                    Some(v) if v.dim() == update.dim() => v * self.momentum + &update,
                    Some(_) => {
                        return Err(IncrementalError::ShapeMismatch(
                            "parameter changed shape under the optimizer".to_string(),
                        ))
                    }
                    None => update,
                };
                update = v.clone();
                *velocity = Some(v);
            }

            param.value.scaled_add(-self.learning_rate, &update);
        }
        Ok(())
    }

    /// Drop all momentum state
    pub fn reset(&mut self) {
        self.velocity.clear();
    }
}
