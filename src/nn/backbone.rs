//! Feature extractor

use ndarray::Array2;
use rand::Rng;

use super::layer::{Activation, DenseLayer};
use super::param::Param;
use crate::config::BackboneConfig;
use crate::Result;

/// Stack of dense layers mapping a flattened image to its feature vector.
///
/// Hidden layers use ReLU. The final layer is linear when the backbone feeds
/// a cosine head, so features keep their sign before normalisation.
#[derive(Debug, Clone)]
pub struct Backbone {
    layers: Vec<DenseLayer>,
}

impl Backbone {
    pub fn new<R: Rng + ?Sized>(config: &BackboneConfig, cosine: bool, rng: &mut R) -> Result<Self> {
        let mut sizes = vec![config.input_dim()];
        sizes.extend(&config.hidden_dims);
        sizes.push(config.feature_dim);

        let n_layers = sizes.len() - 1;
        let mut layers = Vec::with_capacity(n_layers);
        for i in 0..n_layers {
            let activation = if cosine && i == n_layers - 1 {
                Activation::Linear
            } else {
                Activation::ReLU
            };
            layers.push(DenseLayer::new(sizes[i], sizes[i + 1], activation, rng)?);
        }

        Ok(Self { layers })
    }

    pub fn input_dim(&self) -> usize {
        self.layers.first().map_or(0, DenseLayer::input_size)
    }

    pub fn feature_dim(&self) -> usize {
        self.layers.last().map_or(0, DenseLayer::output_size)
    }

    pub fn forward(&mut self, input: &Array2<f64>) -> Result<Array2<f64>> {
        let mut output = input.clone();
        for layer in &mut self.layers {
            output = layer.forward(&output)?;
        }
        Ok(output)
    }

    pub fn infer(&self, input: &Array2<f64>) -> Result<Array2<f64>> {
        let mut output = input.clone();
        for layer in &self.layers {
            output = layer.infer(&output)?;
        }
        Ok(output)
    }

    /// Backpropagate a gradient w.r.t. the features
    pub fn backward(&mut self, feature_gradient: &Array2<f64>) -> Result<()> {
        let mut gradient = feature_gradient.clone();
        for layer in self.layers.iter_mut().rev() {
            gradient = layer.backward(&gradient)?;
        }
        Ok(())
    }

    pub fn params_mut(&mut self) -> Vec<&mut Param> {
        self.layers
            .iter_mut()
            .flat_map(|layer| layer.params_mut())
            .collect()
    }

    pub fn num_parameters(&self) -> usize {
        self.layers.iter().map(DenseLayer::num_parameters).sum()
    }
}
