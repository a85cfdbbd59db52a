//! Neural network module
//!
//! Provides the model that the incremental controller trains:
//! - Trainable parameters with gradient buffers
//! - Dense layers and the feature extractor built from them
//! - Linear and cosine classification heads that grow by replacement
//! - The combined classifier with selectable output modes
//! - SGD with momentum/weight decay and a multi-step learning rate schedule

pub mod functional;
mod backbone;
mod head;
mod layer;
mod model;
mod optimizer;
mod param;
mod scheduler;

pub use backbone::Backbone;
pub use head::{kaiming_rows, CosineHead, Head, LinearHead};
pub use layer::{Activation, DenseLayer};
pub use model::{Classifier, ModelOutput, OutputMode};
pub use optimizer::Sgd;
pub use param::Param;
pub use scheduler::MultiStepLr;
