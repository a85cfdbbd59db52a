//! Classification heads
//!
//! Weights are stored class-major (`n_classes x feature_dim`) so that growing
//! a head is a row concatenation: old class rows first, new class rows after.

use ndarray::{concatenate, Array1, Array2, Axis};
use ndarray_rand::rand_distr::Normal;
use ndarray_rand::RandomExt;
use rand::Rng;

use super::functional::{l2_normalize_rows, l2_normalize_rows_backward};
use super::param::Param;
use crate::{IncrementalError, Result};

/// Kaiming-normal rows for `rows` classes over `feature_dim` inputs
pub fn kaiming_rows<R: Rng + ?Sized>(rows: usize, feature_dim: usize, rng: &mut R) -> Result<Array2<f64>> {
    let std = (2.0 / feature_dim.max(1) as f64).sqrt();
    let normal = Normal::new(0.0, std)
        .map_err(|e| IncrementalError::InvalidConfig(format!("head init: {}", e)))?;
    Ok(Array2::random_using((rows, feature_dim), normal, rng))
}

fn check_features(features: &Array2<f64>, weight: &Array2<f64>) -> Result<()> {
    if features.ncols() != weight.ncols() {
        return Err(IncrementalError::ShapeMismatch(format!(
            "head expects {} features, got {}",
            weight.ncols(),
            features.ncols()
        )));
    }
    Ok(())
}

fn grown_weight(old: &Array2<f64>, new_rows: &Array2<f64>) -> Result<Array2<f64>> {
    if new_rows.ncols() != old.ncols() {
        return Err(IncrementalError::ShapeMismatch(format!(
            "new head rows have {} columns, head has {}",
            new_rows.ncols(),
            old.ncols()
        )));
    }
    concatenate(Axis(0), &[old.view(), new_rows.view()])
        .map_err(|e| IncrementalError::ShapeMismatch(e.to_string()))
}

/// `logits = f * W^T + b`
#[derive(Debug)]
pub struct LinearHead {
    pub weight: Param,
    pub bias: Param,
    last_features: Option<Array2<f64>>,
}

impl LinearHead {
    pub fn new(weight: Array2<f64>) -> Self {
        let classes = weight.nrows();
        Self {
            weight: Param::new(weight),
            bias: Param::zeros(1, classes),
            last_features: None,
        }
    }

    fn logits(&self, features: &Array2<f64>) -> Result<Array2<f64>> {
        check_features(features, &self.weight.value)?;
        Ok(features.dot(&self.weight.value.t()) + &self.bias.value)
    }

    fn backward(&mut self, grad: &Array2<f64>) -> Result<Array2<f64>> {
        let features = self
            .last_features
            .as_ref()
            .ok_or(IncrementalError::MissingForwardPass)?;

        self.weight.accumulate(&grad.t().dot(features));
        self.bias.accumulate(&grad.sum_axis(Axis(0)).insert_axis(Axis(0)));
        Ok(grad.dot(&self.weight.value))
    }
}

impl Clone for LinearHead {
    fn clone(&self) -> Self {
        Self {
            weight: self.weight.clone(),
            bias: self.bias.clone(),
            last_features: None,
        }
    }
}

#[derive(Debug)]
struct CosineCache {
    features: Array2<f64>,
    feature_norms: Array1<f64>,
    weight: Array2<f64>,
    weight_norms: Array1<f64>,
    cosine: Array2<f64>,
}

/// `logits = sigma * normalize(f) * normalize(W)^T` with a learned scale `sigma`
#[derive(Debug)]
pub struct CosineHead {
    pub weight: Param,
    /// Learned scale stored as a 1x1 parameter
    pub sigma: Param,
    cache: Option<CosineCache>,
}

impl CosineHead {
    pub fn new(weight: Array2<f64>) -> Self {
        Self {
            weight: Param::new(weight),
            sigma: Param::new(Array2::from_elem((1, 1), 1.0)),
            cache: None,
        }
    }

    pub fn scale(&self) -> f64 {
        self.sigma.value[[0, 0]]
    }

    fn compute(&self, features: &Array2<f64>) -> Result<(Array2<f64>, CosineCache)> {
        check_features(features, &self.weight.value)?;
        let (features, feature_norms) = l2_normalize_rows(features);
        let (weight, weight_norms) = l2_normalize_rows(&self.weight.value);
        let cosine = features.dot(&weight.t());
        let logits = &cosine * self.scale();
        Ok((
            logits,
            CosineCache {
                features,
                feature_norms,
                weight,
                weight_norms,
                cosine,
            },
        ))
    }

    fn backward(&mut self, grad: &Array2<f64>) -> Result<Array2<f64>> {
        let cache = self.cache.as_ref().ok_or(IncrementalError::MissingForwardPass)?;

        let sigma_grad = (grad * &cache.cosine).sum();
        let grad_cosine = grad * self.scale();
        let grad_features = grad_cosine.dot(&cache.weight);
        let grad_weight = grad_cosine.t().dot(&cache.features);

        let weight_grad =
            l2_normalize_rows_backward(&cache.weight, &cache.weight_norms, &grad_weight);
        let feature_grad =
            l2_normalize_rows_backward(&cache.features, &cache.feature_norms, &grad_features);

        self.weight.accumulate(&weight_grad);
        self.sigma.accumulate(&Array2::from_elem((1, 1), sigma_grad));
        Ok(feature_grad)
    }
}

impl Clone for CosineHead {
    fn clone(&self) -> Self {
        Self {
            weight: self.weight.clone(),
            sigma: self.sigma.clone(),
            cache: None,
        }
    }
}

/// Replaceable classification head
#[derive(Debug, Clone)]
pub enum Head {
    Linear(LinearHead),
    Cosine(CosineHead),
}

impl Head {
    pub fn linear(weight: Array2<f64>) -> Self {
        Head::Linear(LinearHead::new(weight))
    }

    pub fn cosine(weight: Array2<f64>) -> Self {
        Head::Cosine(CosineHead::new(weight))
    }

    pub fn is_cosine(&self) -> bool {
        matches!(self, Head::Cosine(_))
    }

    pub fn weight(&self) -> &Array2<f64> {
        match self {
            Head::Linear(head) => &head.weight.value,
            Head::Cosine(head) => &head.weight.value,
        }
    }

    /// Learned scale of a cosine head
    pub fn sigma(&self) -> Option<f64> {
        match self {
            Head::Linear(_) => None,
            Head::Cosine(head) => Some(head.scale()),
        }
    }

    pub fn in_features(&self) -> usize {
        self.weight().ncols()
    }

    pub fn out_features(&self) -> usize {
        self.weight().nrows()
    }

    /// Forward pass that caches what [`Head::backward`] needs
    pub fn forward(&mut self, features: &Array2<f64>) -> Result<Array2<f64>> {
        match self {
            Head::Linear(head) => {
                let logits = head.logits(features)?;
                head.last_features = Some(features.clone());
                Ok(logits)
            }
            Head::Cosine(head) => {
                let (logits, cache) = head.compute(features)?;
                head.cache = Some(cache);
                Ok(logits)
            }
        }
    }

    pub fn infer(&self, features: &Array2<f64>) -> Result<Array2<f64>> {
        match self {
            Head::Linear(head) => head.logits(features),
            Head::Cosine(head) => Ok(head.compute(features)?.0),
        }
    }

    /// Accumulate head gradients and return the gradient w.r.t. the features
    pub fn backward(&mut self, grad_logits: &Array2<f64>) -> Result<Array2<f64>> {
        if grad_logits.ncols() != self.out_features() {
            return Err(IncrementalError::ShapeMismatch(format!(
                "logit gradient has {} columns, head has {} outputs",
                grad_logits.ncols(),
                self.out_features()
            )));
        }
        match self {
            Head::Linear(head) => head.backward(grad_logits),
            Head::Cosine(head) => head.backward(grad_logits),
        }
    }

    /// Build a wider head: existing rows are copied unchanged and `new_rows`
    /// are appended. The linear head keeps its old biases and starts the new
    /// ones at zero; the cosine head carries its scale over.
    pub fn grow(&self, new_rows: &Array2<f64>) -> Result<Head> {
        match self {
            Head::Linear(head) => {
                let weight = grown_weight(&head.weight.value, new_rows)?;
                let mut grown = LinearHead::new(weight);
                grown
                    .bias
                    .value
                    .slice_mut(ndarray::s![.., ..head.bias.value.ncols()])
                    .assign(&head.bias.value);
                Ok(Head::Linear(grown))
            }
            Head::Cosine(head) => {
                let weight = grown_weight(&head.weight.value, new_rows)?;
                let mut grown = CosineHead::new(weight);
                grown.sigma.value.assign(&head.sigma.value);
                Ok(Head::Cosine(grown))
            }
        }
    }

    pub fn params_mut(&mut self) -> Vec<&mut Param> {
        match self {
            Head::Linear(head) => vec![&mut head.weight, &mut head.bias],
            Head::Cosine(head) => vec![&mut head.weight, &mut head.sigma],
        }
    }

    pub fn num_parameters(&self) -> usize {
        match self {
            Head::Linear(head) => head.weight.len() + head.bias.len(),
            Head::Cosine(head) => head.weight.len() + head.sigma.len(),
        }
    }
}
