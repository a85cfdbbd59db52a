//! Image transforms
//!
//! Images are `(channels, height, width)` arrays. A [`Transform`] is an
//! ordered pipeline of [`TransformOp`]s applied to one sample at a time.

use ndarray::{s, Array3, Axis};
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::{IncrementalError, Result};

/// CIFAR-10 channel means
const CIFAR_MEAN: [f64; 3] = [0.4914, 0.4822, 0.4465];
/// CIFAR-10 channel standard deviations
const CIFAR_STD: [f64; 3] = [0.2023, 0.1994, 0.2010];

/// A single transform step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum TransformOp {
    /// Zero-pad every border by `padding`, then crop a random `size` x `size` window
    RandomCrop { size: usize, padding: usize },
    /// Mirror the width axis with probability `p`
    RandomHorizontalFlip { p: f64 },
    /// Per-channel `(x - mean) / std`
    Normalize { mean: Vec<f64>, std: Vec<f64> },
}

impl TransformOp {
    fn apply<R: Rng + ?Sized>(&self, image: Array3<f64>, rng: &mut R) -> Result<Array3<f64>> {
        match self {
            TransformOp::RandomCrop { size, padding } => {
                let (channels, height, width) = image.dim();
                let padded_h = height + 2 * padding;
                let padded_w = width + 2 * padding;
                if *size == 0 || *size > padded_h || *size > padded_w {
                    return Err(IncrementalError::InvalidConfig(format!(
                        "crop size {} does not fit a padded {}x{} image",
                        size, padded_h, padded_w
                    )));
                }

                let mut padded = Array3::zeros((channels, padded_h, padded_w));
                padded
                    .slice_mut(s![.., *padding..*padding + height, *padding..*padding + width])
                    .assign(&image);

                let top = rng.gen_range(0..=padded_h - size);
                let left = rng.gen_range(0..=padded_w - size);
                Ok(padded
                    .slice(s![.., top..top + size, left..left + size])
                    .to_owned())
            }
            TransformOp::RandomHorizontalFlip { p } => {
                if rng.gen::<f64>() < *p {
                    Ok(image.slice(s![.., .., ..;-1]).to_owned())
                } else {
                    Ok(image)
                }
            }
            TransformOp::Normalize { mean, std } => {
                let channels = image.len_of(Axis(0));
                if mean.len() != channels || std.len() != channels {
                    return Err(IncrementalError::ShapeMismatch(format!(
                        "normalize expects {} channels, image has {}",
                        mean.len(),
                        channels
                    )));
                }
                if std.iter().any(|&s| s <= 0.0) {
                    return Err(IncrementalError::InvalidConfig(
                        "normalize std must be > 0".to_string(),
                    ));
                }

                let mut image = image;
                for (c, mut channel) in image.axis_iter_mut(Axis(0)).enumerate() {
                    channel.mapv_inplace(|v| (v - mean[c]) / std[c]);
                }
                Ok(image)
            }
        }
    }
}

/// Ordered transform pipeline
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Transform {
    ops: Vec<TransformOp>,
}

impl Transform {
    pub fn new(ops: Vec<TransformOp>) -> Self {
        Self { ops }
    }

    /// Pipeline that leaves images untouched
    pub fn identity() -> Self {
        Self::default()
    }

    /// Random crop with padding, horizontal flip and CIFAR normalisation
    pub fn cifar_train() -> Self {
        Self::new(vec![
            TransformOp::RandomCrop {
                size: 32,
                padding: 4,
            },
            TransformOp::RandomHorizontalFlip { p: 0.5 },
            Self::cifar_normalize(),
        ])
    }

    /// CIFAR normalisation only
    pub fn cifar_test() -> Self {
        Self::new(vec![Self::cifar_normalize()])
    }

    fn cifar_normalize() -> TransformOp {
        TransformOp::Normalize {
            mean: CIFAR_MEAN.to_vec(),
            std: CIFAR_STD.to_vec(),
        }
    }

    /// Append a step to the pipeline
    pub fn then(mut self, op: TransformOp) -> Self {
        self.ops.push(op);
        self
    }

    pub fn ops(&self) -> &[TransformOp] {
        &self.ops
    }

    pub fn is_identity(&self) -> bool {
        self.ops.is_empty()
    }

    /// Run every step in order
    pub fn apply<R: Rng + ?Sized>(&self, image: &Array3<f64>, rng: &mut R) -> Result<Array3<f64>> {
        let mut out = image.clone();
        for op in &self.ops {
            out = op.apply(out, rng)?;
        }
        Ok(out)
    }
}
