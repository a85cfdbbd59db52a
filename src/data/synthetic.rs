//! Synthetic class-clustered images

use ndarray::Array3;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Normal};

use super::dataset::{ImageDataset, Sample};
use crate::{IncrementalError, Result};

/// Generator of images scattered around one random prototype per class
#[derive(Debug, Clone)]
pub struct SyntheticImages {
    pub num_classes: usize,
    /// Image shape as (channels, height, width)
    pub shape: [usize; 3],
    /// Standard deviation of the per-pixel noise
    pub noise: f64,
    pub seed: u64,
    prototypes: Vec<Array3<f64>>,
}

impl SyntheticImages {
    pub fn new(num_classes: usize, shape: [usize; 3], noise: f64, seed: u64) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);
        let [c, h, w] = shape;
        let prototypes = (0..num_classes)
            .map(|_| Array3::from_shape_fn((c, h, w), |_| rng.gen::<f64>()))
            .collect();

        Self {
            num_classes,
            shape,
            noise,
            seed,
            prototypes,
        }
    }

    /// Draw `per_class` samples of every class.
    ///
    /// `split` offsets the sampling seed so train and test sets drawn from the
    /// same generator share prototypes but not samples.
    pub fn generate(&self, per_class: usize, split: u64) -> Result<ImageDataset> {
        let normal = Normal::new(0.0, self.noise)
            .map_err(|e| IncrementalError::InvalidConfig(format!("noise: {}", e)))?;
        let mut rng = StdRng::seed_from_u64(self.seed.wrapping_add(split.wrapping_mul(7919) + 1));

        let mut samples = Vec::with_capacity(self.num_classes * per_class);
        for (label, prototype) in self.prototypes.iter().enumerate() {
            for _ in 0..per_class {
                let image = prototype.mapv(|v| v + normal.sample(&mut rng));
                samples.push(Sample::new(image, label));
            }
        }

        Ok(ImageDataset::new(samples))
    }
}
