//! Training and approach parameters

use serde::{Deserialize, Serialize};

use crate::data::Transform;
use crate::{IncrementalError, Result};

/// Optimisation and schedule parameters shared by every method
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainParams {
    /// Base learning rate
    pub learning_rate: f64,
    /// SGD momentum
    pub momentum: f64,
    /// L2 weight decay added to every gradient
    pub weight_decay: f64,
    /// Number of epochs per training pass
    pub num_epochs: usize,
    /// Mini-batch size
    pub batch_size: usize,
    /// Epochs at which the learning rate is multiplied by `gamma`
    pub step_milestones: Vec<usize>,
    /// Learning rate decay factor
    pub gamma: f64,
    /// Augmentation pipeline used while training
    pub train_transform: Transform,
    /// Pipeline used for evaluation and feature extraction
    pub test_transform: Transform,
}

impl Default for TrainParams {
    fn default() -> Self {
        Self {
            learning_rate: 2.0,
            momentum: 0.9,
            weight_decay: 1e-5,
            num_epochs: 70,
            batch_size: 128,
            step_milestones: vec![49, 63],
            gamma: 0.2,
            train_transform: Transform::cifar_train(),
            test_transform: Transform::cifar_test(),
        }
    }
}

impl TrainParams {
    /// Short schedule for smoke runs and tests
    pub fn quick() -> Self {
        Self {
            learning_rate: 0.5,
            num_epochs: 5,
            batch_size: 16,
            step_milestones: vec![3],
            train_transform: Transform::identity(),
            test_transform: Transform::identity(),
            ..Default::default()
        }
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.learning_rate > 0.0) {
            return Err(IncrementalError::InvalidConfig(
                "learning_rate must be > 0".to_string(),
            ));
        }
        if !(0.0..1.0).contains(&self.momentum) {
            return Err(IncrementalError::InvalidConfig(
                "momentum must be in [0, 1)".to_string(),
            ));
        }
        if self.weight_decay < 0.0 {
            return Err(IncrementalError::InvalidConfig(
                "weight_decay must be >= 0".to_string(),
            ));
        }
        if self.batch_size == 0 {
            return Err(IncrementalError::InvalidConfig(
                "batch_size must be > 0".to_string(),
            ));
        }
        if !(self.gamma > 0.0) {
            return Err(IncrementalError::InvalidConfig(
                "gamma must be > 0".to_string(),
            ));
        }
        Ok(())
    }
}

/// Classification term of the composite loss
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClassificationLoss {
    /// Sigmoid binary cross-entropy over every output column
    Bce,
    /// Softmax cross-entropy over the output columns
    Ce,
}

/// Distillation term of the composite loss
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DistillationLoss {
    /// Binary cross-entropy against the sigmoid of the reference outputs
    Icarl,
    /// Less-forget constraint: one minus cosine similarity
    Lfc,
    /// Mean squared error
    Mse,
}

/// How exemplars are picked for a newly introduced class
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SelectionPolicy {
    /// Greedy approximation of the class feature mean
    #[default]
    Herding,
    /// Uniform subset without replacement
    Random,
}

impl std::fmt::Display for SelectionPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SelectionPolicy::Herding => write!(f, "herding"),
            SelectionPolicy::Random => write!(f, "random"),
        }
    }
}

impl From<&str> for SelectionPolicy {
    fn from(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "random" => SelectionPolicy::Random,
            _ => SelectionPolicy::Herding,
        }
    }
}

/// Which retention mechanisms a session uses
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApproachParams {
    pub classification_loss: ClassificationLoss,
    pub distillation_loss: Option<DistillationLoss>,
    pub use_distillation: bool,
    /// Only effective together with `use_distillation`
    pub use_variation: bool,
    pub use_exemplars: bool,
    /// Total exemplar capacity K shared by all known classes
    pub n_exemplars: usize,
    #[serde(default)]
    pub exemplars_selection: SelectionPolicy,
    #[serde(default)]
    pub use_cosine: bool,
}

impl ApproachParams {
    /// Plain fine-tuning: no retention mechanism at all
    pub fn finetuning() -> Self {
        Self {
            classification_loss: ClassificationLoss::Bce,
            distillation_loss: None,
            use_distillation: false,
            use_variation: false,
            use_exemplars: false,
            n_exemplars: 0,
            exemplars_selection: SelectionPolicy::Herding,
            use_cosine: false,
        }
    }

    /// Learning without forgetting preset. The distillation loss is chosen
    /// but left switched off, matching the canonical parameter set.
    pub fn lwf() -> Self {
        Self {
            distillation_loss: Some(DistillationLoss::Icarl),
            ..Self::finetuning()
        }
    }

    /// iCaRL: distillation plus 2000 herding exemplars
    pub fn icarl() -> Self {
        Self {
            use_distillation: true,
            use_exemplars: true,
            n_exemplars: 2000,
            ..Self::lwf()
        }
    }

    /// iCaRL with classification targets from an auxiliary fine-tuned model
    pub fn variation() -> Self {
        Self {
            use_variation: true,
            ..Self::icarl()
        }
    }

    /// Variation targets require distillation to be enabled
    pub fn variation_enabled(&self) -> bool {
        self.use_distillation && self.use_variation
    }

    pub fn validate(&self) -> Result<()> {
        if self.use_distillation && self.distillation_loss.is_none() {
            return Err(IncrementalError::InvalidConfig(
                "use_distillation requires a distillation_loss".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for ApproachParams {
    fn default() -> Self {
        Self::variation()
    }
}

/// Named incremental learning methods
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Method {
    Finetuning,
    Lwf,
    Icarl,
    Variation,
}

impl Method {
    pub fn approach_params(&self) -> ApproachParams {
        match self {
            Method::Finetuning => ApproachParams::finetuning(),
            Method::Lwf => ApproachParams::lwf(),
            Method::Icarl => ApproachParams::icarl(),
            Method::Variation => ApproachParams::variation(),
        }
    }
}

impl From<&str> for Method {
    fn from(s: &str) -> Self {
        match s.to_uppercase().as_str() {
            "FINETUNING" => Method::Finetuning,
            "LWF" => Method::Lwf,
            "ICARL" => Method::Icarl,
            _ => Method::Variation,
        }
    }
}

impl std::fmt::Display for Method {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Method::Finetuning => write!(f, "FINETUNING"),
            Method::Lwf => write!(f, "LWF"),
            Method::Icarl => write!(f, "ICARL"),
            Method::Variation => write!(f, "variation"),
        }
    }
}

/// Resolve a method name to its canonical parameter pair.
///
/// Unknown names fall back to the variation approach.
pub fn get_params(method: &str) -> (TrainParams, ApproachParams) {
    (TrainParams::default(), Method::from(method).approach_params())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_method_lookup() {
        assert_eq!(Method::from("FINETUNING"), Method::Finetuning);
        assert_eq!(Method::from("lwf"), Method::Lwf);
        assert_eq!(Method::from("ICARL"), Method::Icarl);
        assert_eq!(Method::from("anything-else"), Method::Variation);
    }

    #[test]
    fn test_get_params_presets() {
        let (train, approach) = get_params("ICARL");
        assert_eq!(train.learning_rate, 2.0);
        assert_eq!(train.step_milestones, vec![49, 63]);
        assert_eq!(train.num_epochs, 70);
        assert_eq!(train.batch_size, 128);
        assert!(approach.use_distillation);
        assert!(approach.use_exemplars);
        assert!(!approach.use_variation);
        assert_eq!(approach.n_exemplars, 2000);

        let (_, approach) = get_params("FINETUNING");
        assert!(!approach.use_distillation);
        assert!(!approach.use_exemplars);
        assert_eq!(approach.distillation_loss, None);

        let (_, approach) = get_params("unknown");
        assert!(approach.variation_enabled());
    }

    #[test]
    fn test_presets_match_canonical_values() {
        let preset = |loss, distillation, variation, exemplars, n| ApproachParams {
            classification_loss: ClassificationLoss::Bce,
            distillation_loss: loss,
            use_distillation: distillation,
            use_variation: variation,
            use_exemplars: exemplars,
            n_exemplars: n,
            exemplars_selection: SelectionPolicy::Herding,
            use_cosine: false,
        };
        let icarl = Some(DistillationLoss::Icarl);

        assert_eq!(
            get_params("FINETUNING").1,
            preset(None, false, false, false, 0)
        );
        assert_eq!(get_params("LWF").1, preset(icarl, false, false, false, 0));
        assert_eq!(get_params("ICARL").1, preset(icarl, true, false, true, 2000));
        assert_eq!(get_params("other").1, preset(icarl, true, true, true, 2000));

        // The LwF preset names a loss but leaves it switched off
        let lwf = ApproachParams::lwf();
        assert!(!lwf.use_distillation);
        assert!(lwf.validate().is_ok());
    }

    #[test]
    fn test_variation_requires_distillation() {
        let approach = ApproachParams {
            use_distillation: false,
            ..ApproachParams::variation()
        };
        assert!(approach.use_variation);
        assert!(!approach.variation_enabled());
    }

    #[test]
    fn test_validation() {
        assert!(TrainParams::default().validate().is_ok());
        assert!(TrainParams::quick().validate().is_ok());

        let params = TrainParams {
            batch_size: 0,
            ..TrainParams::default()
        };
        assert!(params.validate().is_err());

        let approach = ApproachParams {
            distillation_loss: None,
            ..ApproachParams::icarl()
        };
        assert!(approach.validate().is_err());
    }

    #[test]
    fn test_approach_json_defaults() {
        let json = r#"{
            "classification_loss": "bce",
            "distillation_loss": "icarl",
            "use_distillation": true,
            "use_variation": false,
            "use_exemplars": true,
            "n_exemplars": 2000
        }"#;
        let approach: ApproachParams = serde_json::from_str(json).unwrap();
        assert_eq!(approach.exemplars_selection, SelectionPolicy::Herding);
        assert!(!approach.use_cosine);
        assert_eq!(approach, ApproachParams::icarl());
    }
}
