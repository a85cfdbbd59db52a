//! Dense (fully connected) layer
//!
//! A dense layer performs: output = activation(input * weights + bias)

use ndarray::{Array2, Axis};
use ndarray_rand::rand_distr::Normal;
use ndarray_rand::RandomExt;
use rand::Rng;
use serde::{Deserialize, Serialize};

use super::param::Param;
use crate::{IncrementalError, Result};

/// Activation applied after the affine map
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Activation {
    /// Rectified Linear Unit: max(0, x)
    ReLU,
    /// Identity
    Linear,
}

impl Activation {
    fn forward(&self, z: &Array2<f64>) -> Array2<f64> {
        match self {
            Activation::ReLU => z.mapv(|v| v.max(0.0)),
            Activation::Linear => z.clone(),
        }
    }

    fn derivative(&self, z: &Array2<f64>) -> Array2<f64> {
        match self {
            Activation::ReLU => z.mapv(|v| if v > 0.0 { 1.0 } else { 0.0 }),
            Activation::Linear => Array2::ones(z.dim()),
        }
    }
}

/// Dense layer with weights, biases, and activation function
#[derive(Debug, Serialize, Deserialize)]
pub struct DenseLayer {
    /// Weight matrix (input_size x output_size)
    pub weights: Param,
    /// Bias row (1 x output_size)
    pub biases: Param,
    pub activation: Activation,

    // Cached values for backpropagation (not serialized)
    #[serde(skip)]
    last_input: Option<Array2<f64>>,
    #[serde(skip)]
    last_z: Option<Array2<f64>>,
}

impl DenseLayer {
    /// Create a new dense layer with He (Kaiming) normal initialization
    pub fn new<R: Rng + ?Sized>(
        input_size: usize,
        output_size: usize,
        activation: Activation,
        rng: &mut R,
    ) -> Result<Self> {
        let std = (2.0 / input_size.max(1) as f64).sqrt();
        let normal = Normal::new(0.0, std)
            .map_err(|e| IncrementalError::InvalidConfig(format!("weight init: {}", e)))?;
        let weights = Array2::random_using((input_size, output_size), normal, rng);

        Ok(Self {
            weights: Param::new(weights),
            biases: Param::zeros(1, output_size),
            activation,
            last_input: None,
            last_z: None,
        })
    }

    pub fn input_size(&self) -> usize {
        self.weights.value.nrows()
    }

    pub fn output_size(&self) -> usize {
        self.weights.value.ncols()
    }

    fn affine(&self, input: &Array2<f64>) -> Result<Array2<f64>> {
        if input.ncols() != self.input_size() {
            return Err(IncrementalError::ShapeMismatch(format!(
                "dense layer expects {} inputs, got {}",
                self.input_size(),
                input.ncols()
            )));
        }
        Ok(input.dot(&self.weights.value) + &self.biases.value)
    }

    /// Forward pass that caches activations for [`DenseLayer::backward`]
    pub fn forward(&mut self, input: &Array2<f64>) -> Result<Array2<f64>> {
        let z = self.affine(input)?;
        let output = self.activation.forward(&z);
        self.last_input = Some(input.clone());
        self.last_z = Some(z);
        Ok(output)
    }

    /// Forward pass without caching
    pub fn infer(&self, input: &Array2<f64>) -> Result<Array2<f64>> {
        Ok(self.activation.forward(&self.affine(input)?))
    }

    /// Accumulate parameter gradients and return the gradient w.r.t. the input
    pub fn backward(&mut self, output_gradient: &Array2<f64>) -> Result<Array2<f64>> {
        let (input, z) = match (&self.last_input, &self.last_z) {
            (Some(input), Some(z)) => (input, z),
            _ => return Err(IncrementalError::MissingForwardPass),
        };
        if output_gradient.dim() != z.dim() {
            return Err(IncrementalError::ShapeMismatch(format!(
                "dense layer gradient {:?} does not match output {:?}",
                output_gradient.dim(),
                z.dim()
            )));
        }

        let delta = output_gradient * &self.activation.derivative(z);
        let weight_gradient = input.t().dot(&delta);
        let bias_gradient = delta.sum_axis(Axis(0)).insert_axis(Axis(0));
        let input_gradient = delta.dot(&self.weights.value.t());

        self.weights.accumulate(&weight_gradient);
        self.biases.accumulate(&bias_gradient);
        Ok(input_gradient)
    }

    pub fn params_mut(&mut self) -> [&mut Param; 2] {
        [&mut self.weights, &mut self.biases]
    }

    /// Get number of parameters
    pub fn num_parameters(&self) -> usize {
        self.weights.len() + self.biases.len()
    }
}

impl Clone for DenseLayer {
    fn clone(&self) -> Self {
        Self {
            weights: self.weights.clone(),
            biases: self.biases.clone(),
            activation: self.activation,
            last_input: None,
            last_z: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_layer_creation() {
        let mut rng = StdRng::seed_from_u64(0);
        let layer = DenseLayer::new(10, 5, Activation::ReLU, &mut rng).unwrap();
        assert_eq!(layer.weights.value.dim(), (10, 5));
        assert_eq!(layer.biases.value.dim(), (1, 5));
        assert_eq!(layer.num_parameters(), 10 * 5 + 5);
    }

    #[test]
    fn test_forward_matches_infer() {
        let mut rng = StdRng::seed_from_u64(1);
        let mut layer = DenseLayer::new(4, 3, Activation::ReLU, &mut rng).unwrap();
        let input = Array2::ones((2, 4));
        let trained = layer.forward(&input).unwrap();
        let inferred = layer.infer(&input).unwrap();
        assert_eq!(trained, inferred);
        assert!(layer.infer(&Array2::ones((2, 5))).is_err());
    }

    #[test]
    fn test_backward_linear() {
        let mut rng = StdRng::seed_from_u64(2);
        let mut layer = DenseLayer::new(2, 1, Activation::Linear, &mut rng).unwrap();
        layer.weights.value = array![[2.0], [-1.0]];

        let input = array![[1.0, 3.0]];
        layer.forward(&input).unwrap();
        let grad_in = layer.backward(&array![[1.0]]).unwrap();

        assert_abs_diff_eq!(layer.weights.grad[[0, 0]], 1.0, epsilon = 1e-12);
        assert_abs_diff_eq!(layer.weights.grad[[1, 0]], 3.0, epsilon = 1e-12);
        assert_abs_diff_eq!(layer.biases.grad[[0, 0]], 1.0, epsilon = 1e-12);
        assert_eq!(grad_in, array![[2.0, -1.0]]);
    }

    #[test]
    fn test_backward_without_forward() {
        let mut rng = StdRng::seed_from_u64(3);
        let mut layer = DenseLayer::new(2, 2, Activation::ReLU, &mut rng).unwrap();
        assert!(layer.backward(&Array2::ones((1, 2))).is_err());
    }
}
