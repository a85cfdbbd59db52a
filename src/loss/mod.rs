//! Composite classification + distillation loss
//!
//! The total loss is `ratio * L_cls + (1 - ratio) * L_dist`, where `ratio` is
//! the share of new classes among the known classes. Without a distillation
//! signal the classification term is used alone.

mod terms;

pub use terms::{binary_cross_entropy, cosine_embedding, cross_entropy, mean_squared_error};

use ndarray::Array2;

use crate::config::{ClassificationLoss, DistillationLoss};
use crate::nn::functional::{sigmoid, softmax_rows};
use crate::{IncrementalError, Result};

/// A training target, tagged with where it came from
#[derive(Debug, Clone, PartialEq)]
pub enum Target {
    /// Ground-truth one-hot rows
    Labels(Array2<f64>),
    /// Raw logits of another model
    Logits(Array2<f64>),
    /// Penultimate features of another model
    Features(Array2<f64>),
}

impl Target {
    pub fn values(&self) -> &Array2<f64> {
        match self {
            Target::Labels(v) | Target::Logits(v) | Target::Features(v) => v,
        }
    }

    /// Probabilities for a classification criterion. Labels are used as-is,
    /// model outputs are squashed the way the criterion squashes its input.
    fn probabilities(&self, kind: ClassificationLoss) -> Array2<f64> {
        match self {
            Target::Labels(v) => v.clone(),
            Target::Logits(v) | Target::Features(v) => match kind {
                ClassificationLoss::Bce => v.mapv(sigmoid),
                ClassificationLoss::Ce => softmax_rows(v),
            },
        }
    }
}

/// Loss value and gradients with respect to both inputs
#[derive(Debug, Clone)]
pub struct LossOutput {
    pub value: f64,
    pub classification: f64,
    pub distillation: Option<f64>,
    pub class_grad: Array2<f64>,
    pub distillation_grad: Option<Array2<f64>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompositeLoss {
    classification: ClassificationLoss,
    distillation: Option<DistillationLoss>,
}

impl CompositeLoss {
    pub fn new(classification: ClassificationLoss, distillation: Option<DistillationLoss>) -> Self {
        Self {
            classification,
            distillation,
        }
    }

    pub fn classification(&self) -> ClassificationLoss {
        self.classification
    }

    pub fn distillation(&self) -> Option<DistillationLoss> {
        self.distillation
    }

    /// Evaluate the loss for one batch.
    ///
    /// `ratio` weights the classification term and must lie in `[0, 1]`.
    pub fn compute(
        &self,
        class_input: &Array2<f64>,
        class_target: &Target,
        distillation: Option<(&Array2<f64>, &Target)>,
        ratio: f64,
    ) -> Result<LossOutput> {
        if !(0.0..=1.0).contains(&ratio) {
            return Err(IncrementalError::InvalidConfig(format!(
                "loss ratio {} outside [0, 1]",
                ratio
            )));
        }
        check_shapes("classification", class_input, class_target.values())?;

        let probs = class_target.probabilities(self.classification);
        let (classification, class_grad) = match self.classification {
            ClassificationLoss::Bce => binary_cross_entropy(class_input, &probs),
            ClassificationLoss::Ce => cross_entropy(class_input, &probs),
        };

        let Some((dist_input, dist_target)) = distillation else {
            return Ok(LossOutput {
                value: classification,
                classification,
                distillation: None,
                class_grad,
                distillation_grad: None,
            });
        };

        let kind = self.distillation.ok_or_else(|| {
            IncrementalError::InvalidConfig(
                "distillation signal given but no distillation loss configured".to_string(),
            )
        })?;
        check_shapes("distillation", dist_input, dist_target.values())?;

        let reference = dist_target.values();
        let (distillation, dist_grad) = match kind {
            DistillationLoss::Icarl => binary_cross_entropy(dist_input, &reference.mapv(sigmoid)),
            DistillationLoss::Lfc => cosine_embedding(dist_input, reference),
            DistillationLoss::Mse => mean_squared_error(dist_input, reference),
        };

        Ok(LossOutput {
            value: ratio * classification + (1.0 - ratio) * distillation,
            classification,
            distillation: Some(distillation),
            class_grad: class_grad * ratio,
            distillation_grad: Some(dist_grad * (1.0 - ratio)),
        })
    }
}

fn check_shapes(term: &str, input: &Array2<f64>, target: &Array2<f64>) -> Result<()> {
    if input.dim() != target.dim() {
        return Err(IncrementalError::ShapeMismatch(format!(
            "{} input {:?} does not match target {:?}",
            term,
            input.dim(),
            target.dim()
        )));
    }
    Ok(())
}
