//! # Class-Incremental Learning
//!
//! This crate trains an image classifier progressively on successive groups of
//! classes without full access to the data of earlier groups. Knowledge of old
//! classes is retained through two complementary mechanisms:
//!
//! - Knowledge distillation against a frozen snapshot of the previous model
//! - A bounded exemplar memory selected by herding in feature space
//!
//! An optional auxiliary fine-tuned model ("variation") produces softened
//! classification targets for the newly added classes.
//!
//! ## Modules
//!
//! - `config` - Training and approach parameters, method presets
//! - `data` - Label splitting, in-memory image datasets, transforms
//! - `nn` - Backbone, linear/cosine heads, SGD and learning rate schedule
//! - `loss` - Composite classification + distillation loss
//! - `exemplars` - Exemplar memory with herding and random selection
//! - `learner` - The incremental step controller
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use class_incremental::prelude::*;
//!
//! let config = LearnerConfig::for_method("ICARL", 10, 5);
//! let mut learner = IncrementalLearner::new(config)?;
//!
//! for _ in 0..learner.num_groups() {
//!     let report = learner.run_step(&train_data, &test_data)?;
//!     println!("step {}: {:.2}%", report.step, report.accuracy * 100.0);
//! }
//! ```

pub mod config;
pub mod data;
pub mod exemplars;
pub mod learner;
pub mod loss;
pub mod nn;

// Re-exports
pub use config::{ApproachParams, LearnerConfig, Method, SelectionPolicy, TrainParams};
pub use data::{ImageDataset, LabelSplitter, Sample, SyntheticImages, Transform};
pub use exemplars::ExemplarSet;
pub use learner::{IncrementalLearner, LearnerState, StepReport, TrainingReport};
pub use loss::{CompositeLoss, Target};
pub use nn::{Classifier, Head, OutputMode};

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::config::{
        get_params, ApproachParams, BackboneConfig, ClassificationLoss, DistillationLoss,
        LearnerConfig, Method, SelectionPolicy, TrainParams,
    };
    pub use crate::data::{
        Batch, ImageDataset, LabelSplitter, Sample, SyntheticImages, Transform, TransformOp,
    };
    pub use crate::exemplars::{exemplar_quota, herding_selection, random_selection, ExemplarSet};
    pub use crate::learner::{IncrementalLearner, LearnerState, StepReport, TrainingReport};
    pub use crate::loss::{CompositeLoss, LossOutput, Target};
    pub use crate::nn::{Classifier, Head, ModelOutput, MultiStepLr, OutputMode, Sgd};
    pub use crate::{IncrementalError, Result};
}

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Error types for the crate
#[derive(thiserror::Error, Debug)]
pub enum IncrementalError {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Operation `{operation}` is not allowed in state {state}")]
    OutOfOrder {
        operation: &'static str,
        state: learner::LearnerState,
    },

    #[error("Step {step} is out of range: the session has {num_groups} groups")]
    StepOutOfRange { step: usize, num_groups: usize },

    #[error("Shape mismatch: {0}")]
    ShapeMismatch(String),

    #[error("Backward pass requested without a preceding training forward pass")]
    MissingForwardPass,

    #[error("Empty dataset: {0}")]
    EmptyDataset(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, IncrementalError>;
