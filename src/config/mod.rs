//! Configuration for incremental learning sessions
//!
//! - `params` - Training parameters, approach parameters and method presets
//! - `session` - Backbone shape and the bundled learner configuration

mod params;
mod session;

pub use params::{
    get_params, ApproachParams, ClassificationLoss, DistillationLoss, Method, SelectionPolicy,
    TrainParams,
};
pub use session::{BackboneConfig, LearnerConfig};
