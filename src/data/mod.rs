//! Data handling
//!
//! - `splitter` - Seeded partition of the class set into ordered groups
//! - `dataset` - In-memory image datasets and mini-batches
//! - `transform` - Per-sample augmentation and normalisation
//! - `synthetic` - Class-clustered synthetic images

mod dataset;
mod splitter;
mod synthetic;
mod transform;

pub use dataset::{one_hot, Batch, ImageDataset, Sample};
pub use splitter::LabelSplitter;
pub use synthetic::SyntheticImages;
pub use transform::{Transform, TransformOp};
