//! Session-level configuration

use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;

use super::params::{ApproachParams, Method, TrainParams};
use crate::{IncrementalError, Result};

/// Shape of the feature extractor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackboneConfig {
    /// Image shape as (channels, height, width)
    pub input_shape: [usize; 3],
    /// Hidden layer widths
    pub hidden_dims: Vec<usize>,
    /// Width of the penultimate feature vector fed to the head
    pub feature_dim: usize,
}

impl Default for BackboneConfig {
    fn default() -> Self {
        Self {
            input_shape: [3, 32, 32],
            hidden_dims: vec![256, 128],
            feature_dim: 64,
        }
    }
}

impl BackboneConfig {
    /// Small backbone for synthetic data
    pub fn small(input_shape: [usize; 3]) -> Self {
        Self {
            input_shape,
            hidden_dims: vec![32],
            feature_dim: 16,
        }
    }

    /// Number of input values after flattening an image
    pub fn input_dim(&self) -> usize {
        self.input_shape.iter().product()
    }

    pub fn validate(&self) -> Result<()> {
        if self.input_dim() == 0 {
            return Err(IncrementalError::InvalidConfig(
                "input_shape must not contain zeros".to_string(),
            ));
        }
        if self.feature_dim == 0 || self.hidden_dims.iter().any(|&d| d == 0) {
            return Err(IncrementalError::InvalidConfig(
                "layer widths must be > 0".to_string(),
            ));
        }
        Ok(())
    }
}

/// Everything needed to start an incremental session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LearnerConfig {
    /// Total number of classes over the whole session
    pub num_classes: usize,
    /// Number of class groups, one per incremental step
    pub num_groups: usize,
    /// Seed of the class permutation
    pub splitter_seed: u64,
    /// Seed for weight initialisation, shuffling and random selection.
    /// `None` draws from OS entropy.
    #[serde(default)]
    pub seed: Option<u64>,
    #[serde(default)]
    pub backbone: BackboneConfig,
    pub train: TrainParams,
    pub approach: ApproachParams,
}

impl LearnerConfig {
    /// Canonical configuration for a named method
    pub fn for_method(method: &str, num_classes: usize, num_groups: usize) -> Self {
        Self {
            num_classes,
            num_groups,
            splitter_seed: 0,
            seed: None,
            backbone: BackboneConfig::default(),
            train: TrainParams::default(),
            approach: Method::from(method).approach_params(),
        }
    }

    /// Classes introduced at every step
    pub fn classes_per_group(&self) -> usize {
        if self.num_groups == 0 {
            0
        } else {
            self.num_classes / self.num_groups
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.num_groups == 0 {
            return Err(IncrementalError::InvalidConfig(
                "num_groups must be > 0".to_string(),
            ));
        }
        if self.num_classes == 0 || self.num_classes % self.num_groups != 0 {
            return Err(IncrementalError::InvalidConfig(format!(
                "num_classes ({}) must be a positive multiple of num_groups ({})",
                self.num_classes, self.num_groups
            )));
        }
        self.backbone.validate()?;
        self.train.validate()?;
        self.approach.validate()
    }

    /// Load configuration from a JSON file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let file = File::open(path)?;
        let config: Self = serde_json::from_reader(BufReader::new(file))?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to a JSON file
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let file = File::create(path)?;
        serde_json::to_writer_pretty(BufWriter::new(file), self)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classes_per_group() {
        let config = LearnerConfig::for_method("ICARL", 10, 5);
        assert!(config.validate().is_ok());
        assert_eq!(config.classes_per_group(), 2);
    }

    #[test]
    fn test_indivisible_classes_rejected() {
        let config = LearnerConfig::for_method("ICARL", 10, 3);
        assert!(matches!(
            config.validate(),
            Err(IncrementalError::InvalidConfig(_))
        ));

        let config = LearnerConfig::for_method("ICARL", 10, 0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_save_and_load() {
        let mut config = LearnerConfig::for_method("LWF", 20, 4);
        config.seed = Some(7);
        config.backbone = BackboneConfig::small([1, 4, 4]);

        let path = std::env::temp_dir().join(format!(
            "class_incremental_config_{}.json",
            std::process::id()
        ));
        config.save(&path).unwrap();
        let loaded = LearnerConfig::load(&path).unwrap();
        std::fs::remove_file(&path).ok();

        assert_eq!(loaded, config);
    }

    #[test]
    fn test_load_missing_file() {
        let result = LearnerConfig::load("/definitely/not/here.json");
        assert!(matches!(result, Err(IncrementalError::Io(_))));
    }
}
