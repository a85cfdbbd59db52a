//! Backbone + head classifier

use ndarray::Array2;

use super::backbone::Backbone;
use super::head::Head;
use super::param::Param;
use crate::{IncrementalError, Result};

/// Which outputs a forward pass returns
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputMode {
    Logits,
    /// Logits and penultimate features
    All,
    Features,
}

/// Result of a forward pass in the requested [`OutputMode`]
#[derive(Debug, Clone)]
pub enum ModelOutput {
    Logits(Array2<f64>),
    All {
        logits: Array2<f64>,
        features: Array2<f64>,
    },
    Features(Array2<f64>),
}

impl ModelOutput {
    pub fn logits(&self) -> Option<&Array2<f64>> {
        match self {
            ModelOutput::Logits(logits) | ModelOutput::All { logits, .. } => Some(logits),
            ModelOutput::Features(_) => None,
        }
    }

    pub fn features(&self) -> Option<&Array2<f64>> {
        match self {
            ModelOutput::Features(features) | ModelOutput::All { features, .. } => Some(features),
            ModelOutput::Logits(_) => None,
        }
    }
}

/// Feature extractor with a replaceable classification head.
///
/// `Clone` produces an independent deep copy without cached activations,
/// which is how snapshots and auxiliary models are made.
#[derive(Debug, Clone)]
pub struct Classifier {
    backbone: Backbone,
    head: Head,
}

impl Classifier {
    pub fn new(backbone: Backbone, head: Head) -> Result<Self> {
        if head.in_features() != backbone.feature_dim() {
            return Err(IncrementalError::ShapeMismatch(format!(
                "head expects {} features, backbone produces {}",
                head.in_features(),
                backbone.feature_dim()
            )));
        }
        Ok(Self { backbone, head })
    }

    pub fn head(&self) -> &Head {
        &self.head
    }

    pub fn backbone(&self) -> &Backbone {
        &self.backbone
    }

    pub fn num_classes(&self) -> usize {
        self.head.out_features()
    }

    pub fn feature_dim(&self) -> usize {
        self.backbone.feature_dim()
    }

    /// Swap in a new head; the old one is dropped
    pub fn replace_head(&mut self, head: Head) -> Result<()> {
        if head.in_features() != self.backbone.feature_dim() {
            return Err(IncrementalError::ShapeMismatch(format!(
                "replacement head expects {} features, backbone produces {}",
                head.in_features(),
                self.backbone.feature_dim()
            )));
        }
        self.head = head;
        Ok(())
    }

    /// Training forward pass; caches activations for [`Classifier::backward`]
    pub fn forward(&mut self, images: &Array2<f64>, mode: OutputMode) -> Result<ModelOutput> {
        let features = self.backbone.forward(images)?;
        Ok(match mode {
            OutputMode::Features => ModelOutput::Features(features),
            OutputMode::Logits => ModelOutput::Logits(self.head.forward(&features)?),
            OutputMode::All => ModelOutput::All {
                logits: self.head.forward(&features)?,
                features,
            },
        })
    }

    /// Gradient-free forward pass
    pub fn infer(&self, images: &Array2<f64>, mode: OutputMode) -> Result<ModelOutput> {
        let features = self.backbone.infer(images)?;
        Ok(match mode {
            OutputMode::Features => ModelOutput::Features(features),
            OutputMode::Logits => ModelOutput::Logits(self.head.infer(&features)?),
            OutputMode::All => ModelOutput::All {
                logits: self.head.infer(&features)?,
                features,
            },
        })
    }

    /// Training forward pass returning `(logits, features)`
    pub fn forward_all(&mut self, images: &Array2<f64>) -> Result<(Array2<f64>, Array2<f64>)> {
        let features = self.backbone.forward(images)?;
        let logits = self.head.forward(&features)?;
        Ok((logits, features))
    }

    pub fn infer_all(&self, images: &Array2<f64>) -> Result<(Array2<f64>, Array2<f64>)> {
        let features = self.backbone.infer(images)?;
        let logits = self.head.infer(&features)?;
        Ok((logits, features))
    }

    pub fn infer_logits(&self, images: &Array2<f64>) -> Result<Array2<f64>> {
        self.head.infer(&self.backbone.infer(images)?)
    }

    pub fn infer_features(&self, images: &Array2<f64>) -> Result<Array2<f64>> {
        self.backbone.infer(images)
    }

    /// Accumulate gradients from the logits and, optionally, directly from the
    /// penultimate features.
    pub fn backward(
        &mut self,
        grad_logits: &Array2<f64>,
        grad_features: Option<&Array2<f64>>,
    ) -> Result<()> {
        let mut feature_gradient = self.head.backward(grad_logits)?;
        if let Some(extra) = grad_features {
            if extra.dim() != feature_gradient.dim() {
                return Err(IncrementalError::ShapeMismatch(format!(
                    "feature gradient {:?} does not match features {:?}",
                    extra.dim(),
                    feature_gradient.dim()
                )));
            }
            feature_gradient += extra;
        }
        self.backbone.backward(&feature_gradient)
    }

    pub fn zero_grad(&mut self) {
        for param in self.params_mut() {
            param.zero_grad();
        }
    }

    /// Every trainable parameter, backbone first, in a stable order
    pub fn params_mut(&mut self) -> Vec<&mut Param> {
        let mut params = self.backbone.params_mut();
        params.extend(self.head.params_mut());
        params
    }

    pub fn num_parameters(&self) -> usize {
        self.backbone.num_parameters() + self.head.num_parameters()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BackboneConfig;
    use crate::nn::head::kaiming_rows;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn classifier(cosine: bool) -> Classifier {
        let mut rng = StdRng::seed_from_u64(8);
        let config = BackboneConfig::small([1, 2, 2]);
        let backbone = Backbone::new(&config, cosine, &mut rng).unwrap();
        let rows = kaiming_rows(3, config.feature_dim, &mut rng).unwrap();
        let head = if cosine { Head::cosine(rows) } else { Head::linear(rows) };
        Classifier::new(backbone, head).unwrap()
    }

    #[test]
    fn test_output_modes() {
        let mut model = classifier(false);
        let images = Array2::ones((5, 4));

        let out = model.forward(&images, OutputMode::All).unwrap();
        assert_eq!(out.logits().unwrap().dim(), (5, 3));
        assert_eq!(out.features().unwrap().dim(), (5, 16));

        let out = model.infer(&images, OutputMode::Features).unwrap();
        assert!(out.logits().is_none());

        let out = model.infer(&images, OutputMode::Logits).unwrap();
        assert!(out.features().is_none());
    }

    #[test]
    fn test_clone_is_independent() {
        let mut model = classifier(true);
        let snapshot = model.clone();
        let images = Array2::ones((2, 4));

        model.forward_all(&images).unwrap();
        model.backward(&Array2::ones((2, 3)), None).unwrap();
        for p in model.params_mut() {
            p.value -= &(&p.grad * 0.1);
        }

        let before = snapshot.infer_logits(&images).unwrap();
        assert_ne!(before, model.infer_logits(&images).unwrap());
        assert_eq!(before, snapshot.infer_logits(&images).unwrap());
    }

    #[test]
    fn test_backward_with_feature_gradient() {
        let mut model = classifier(false);
        let images = Array2::ones((2, 4));
        model.forward_all(&images).unwrap();
        assert!(model
            .backward(&Array2::zeros((2, 3)), Some(&Array2::ones((2, 16))))
            .is_ok());
        assert!(model
            .backward(&Array2::zeros((2, 3)), Some(&Array2::ones((2, 4))))
            .is_err());

        model.zero_grad();
        assert!(model.params_mut().iter().all(|p| p.grad.iter().all(|&g| g == 0.0)));
    }

    #[test]
    fn test_replace_head_checks_width() {
        let mut model = classifier(false);
        assert!(model.replace_head(Head::linear(Array2::zeros((4, 3)))).is_err());
        assert!(model.replace_head(Head::linear(Array2::zeros((4, 16)))).is_ok());
        assert_eq!(model.num_classes(), 4);
    }
}
