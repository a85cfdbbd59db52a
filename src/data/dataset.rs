//! In-memory image datasets

use ndarray::{Array2, Array3};
use rand::seq::SliceRandom;
use rand::Rng;
use std::collections::HashSet;

use super::splitter::LabelSplitter;
use super::transform::Transform;
use crate::{IncrementalError, Result};

/// A raw image with its class label
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    /// Image as (channels, height, width)
    pub image: Array3<f64>,
    pub label: usize,
}

impl Sample {
    pub fn new(image: Array3<f64>, label: usize) -> Self {
        Self { image, label }
    }
}

/// A transformed mini-batch ready for the model
#[derive(Debug, Clone)]
pub struct Batch {
    /// Flattened images, one row per sample
    pub images: Array2<f64>,
    pub labels: Vec<usize>,
}

impl Batch {
    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }
}

/// Image dataset with an attached transform pipeline.
///
/// Samples are stored raw; the transform runs when batches are built, so
/// [`ImageDataset::get`] always returns the untransformed sample.
#[derive(Debug, Clone, Default)]
pub struct ImageDataset {
    samples: Vec<Sample>,
    transform: Transform,
}

impl ImageDataset {
    pub fn new(samples: Vec<Sample>) -> Self {
        Self {
            samples,
            transform: Transform::identity(),
        }
    }

    /// Replace the transform pipeline
    pub fn with_transform(mut self, transform: Transform) -> Self {
        self.transform = transform;
        self
    }

    pub fn transform(&self) -> &Transform {
        &self.transform
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Raw sample at a positional index
    pub fn get(&self, index: usize) -> Option<&Sample> {
        self.samples.get(index)
    }

    pub fn samples(&self) -> &[Sample] {
        &self.samples
    }

    pub fn labels(&self) -> impl Iterator<Item = usize> + '_ {
        self.samples.iter().map(|s| s.label)
    }

    /// Append samples, e.g. exemplars, to the dataset
    pub fn extend<I: IntoIterator<Item = Sample>>(&mut self, samples: I) {
        self.samples.extend(samples);
    }

    /// Samples whose original label is in `labels`, relabelled to incremental
    /// indices through `splitter`. The result carries no transform.
    pub fn for_classes(&self, splitter: &LabelSplitter, labels: &[usize]) -> Result<Self> {
        let wanted: HashSet<usize> = labels.iter().copied().collect();
        let mut samples = Vec::new();

        for sample in self.samples.iter().filter(|s| wanted.contains(&s.label)) {
            let label = splitter.map_label(sample.label).ok_or_else(|| {
                IncrementalError::ShapeMismatch(format!(
                    "label {} is not part of the class split",
                    sample.label
                ))
            })?;
            samples.push(Sample::new(sample.image.clone(), label));
        }

        Ok(Self::new(samples))
    }

    /// Transform, flatten and group samples into mini-batches
    pub fn batches<R: Rng + ?Sized>(
        &self,
        batch_size: usize,
        shuffle: bool,
        rng: &mut R,
    ) -> Result<Vec<Batch>> {
        if batch_size == 0 {
            return Err(IncrementalError::InvalidConfig(
                "batch_size must be > 0".to_string(),
            ));
        }

        let mut indices: Vec<usize> = (0..self.samples.len()).collect();
        if shuffle {
            indices.shuffle(rng);
        }

        let mut batches = Vec::with_capacity((indices.len() + batch_size - 1) / batch_size);
        let mut width: Option<usize> = None;

        for chunk in indices.chunks(batch_size) {
            let mut rows = Vec::new();
            let mut labels = Vec::with_capacity(chunk.len());

            for &i in chunk {
                let sample = &self.samples[i];
                let image = self.transform.apply(&sample.image, rng)?;
                let expected = *width.get_or_insert(image.len());
                if image.len() != expected {
                    return Err(IncrementalError::ShapeMismatch(format!(
                        "sample {} flattens to {} values, expected {}",
                        i,
                        image.len(),
                        expected
                    )));
                }
                rows.extend(image.iter().copied());
                labels.push(sample.label);
            }

            let images = Array2::from_shape_vec((chunk.len(), width.unwrap_or(0)), rows)
                .map_err(|e| IncrementalError::ShapeMismatch(e.to_string()))?;
            batches.push(Batch { images, labels });
        }

        Ok(batches)
    }
}

/// Expand integer labels to one-hot rows of the given width
pub fn one_hot(labels: &[usize], width: usize) -> Result<Array2<f64>> {
    let mut out = Array2::zeros((labels.len(), width));
    for (row, &label) in labels.iter().enumerate() {
        if label >= width {
            return Err(IncrementalError::ShapeMismatch(format!(
                "label {} outside the {} known classes",
                label, width
            )));
        }
        out[[row, label]] = 1.0;
    }
    Ok(out)
}
