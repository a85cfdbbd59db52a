//! Per-class exemplar storage

use ndarray::{Array1, Array2, Axis};
use rand::Rng;

use crate::data::{ImageDataset, Sample, Transform};
use crate::nn::functional::{l2_normalize, l2_normalize_rows};
use crate::nn::Classifier;
use crate::Result;

/// Exemplars grouped by incremental class index, in class-introduction order.
/// Each list keeps the order in which its samples were selected.
#[derive(Debug, Clone, Default)]
pub struct ExemplarSet {
    classes: Vec<Vec<Sample>>,
}

impl ExemplarSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of classes with an exemplar list (possibly empty)
    pub fn num_classes(&self) -> usize {
        self.classes.len()
    }

    /// Total number of stored exemplars
    pub fn len(&self) -> usize {
        self.classes.iter().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.classes.iter().all(Vec::is_empty)
    }

    pub fn class(&self, index: usize) -> Option<&[Sample]> {
        self.classes.get(index).map(Vec::as_slice)
    }

    /// Append the list for the next class
    pub fn push_class(&mut self, samples: Vec<Sample>) {
        self.classes.push(samples);
    }

    /// Keep only the first `quota` entries of every list
    pub fn truncate_each(&mut self, quota: usize) {
        for class in &mut self.classes {
            class.truncate(quota);
        }
    }

    pub fn samples(&self) -> impl Iterator<Item = &Sample> {
        self.classes.iter().flatten()
    }

    /// All exemplars as a dataset without a transform
    pub fn to_dataset(&self) -> ImageDataset {
        ImageDataset::new(self.samples().cloned().collect())
    }

    /// L2-normalised mean of the L2-normalised exemplar features, one row per
    /// class. Classes without exemplars get a zero row, which [`nearest_mean`]
    /// skips.
    pub fn class_means<R: Rng + ?Sized>(
        &self,
        model: &Classifier,
        transform: &Transform,
        batch_size: usize,
        rng: &mut R,
    ) -> Result<Array2<f64>> {
        let mut means = Array2::zeros((self.classes.len(), model.feature_dim()));

        for (class, samples) in self.classes.iter().enumerate() {
            if samples.is_empty() {
                continue;
            }
            let dataset = ImageDataset::new(samples.clone()).with_transform(transform.clone());
            let mut sum: Array1<f64> = Array1::zeros(model.feature_dim());
            for batch in dataset.batches(batch_size, false, rng)? {
                let (features, _) = l2_normalize_rows(&model.infer_features(&batch.images)?);
                sum += &features.sum_axis(Axis(0));
            }
            let mean = sum / samples.len() as f64;
            means.row_mut(class).assign(&l2_normalize(mean.view()));
        }

        Ok(means)
    }
}

/// Nearest-mean-of-exemplars prediction for each row of `features`.
///
/// All-zero mean rows belong to classes without exemplars and are never
/// predicted.
pub fn nearest_mean(features: &Array2<f64>, means: &Array2<f64>) -> Vec<usize> {
    let (features, _) = l2_normalize_rows(features);
    features
        .axis_iter(Axis(0))
        .map(|row| {
            means
                .axis_iter(Axis(0))
                .map(|mean| {
                    if mean.iter().all(|&v| v == 0.0) {
                        f64::INFINITY
                    } else {
                        (&row - &mean).mapv(|d| d * d).sum()
                    }
                })
                .enumerate()
                .fold((0, f64::INFINITY), |best, (i, d)| if d < best.1 { (i, d) } else { best })
                .0
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exemplars::exemplar_quota;
    use ndarray::{array, Array3};

    fn samples(label: usize, count: usize) -> Vec<Sample> {
        (0..count)
            .map(|i| Sample::new(Array3::from_elem((1, 1, 1), i as f64), label))
            .collect()
    }

    #[test]
    fn test_truncation_keeps_prefix() {
        let mut set = ExemplarSet::new();
        set.push_class(samples(0, 5));
        set.push_class(samples(1, 2));

        let before: Vec<Sample> = set.class(0).unwrap().to_vec();
        set.truncate_each(3);

        assert_eq!(set.class(0).unwrap(), &before[..3]);
        assert_eq!(set.class(1).unwrap().len(), 2);
        assert_eq!(set.len(), 5);
    }

    #[test]
    fn test_capacity_scenario() {
        let capacity = 2000;
        let mut set = ExemplarSet::new();
        for class in 0..5 {
            set.push_class(samples(class, exemplar_quota(capacity, 5)));
        }
        assert_eq!(set.class(0).unwrap().len(), 400);
        assert_eq!(set.len(), 2000);

        let quota = exemplar_quota(capacity, 6);
        assert_eq!(quota, 333);
        set.truncate_each(quota);
        set.push_class(samples(5, quota));

        assert!((0..6).all(|c| set.class(c).unwrap().len() == 333));
        assert!(set.len() <= capacity);
    }

    #[test]
    fn test_zero_quota_empties_lists() {
        let mut set = ExemplarSet::new();
        set.push_class(samples(0, 4));
        set.truncate_each(0);
        set.push_class(Vec::new());

        assert_eq!(set.num_classes(), 2);
        assert!(set.is_empty());
        assert!(set.to_dataset().is_empty());
    }

    #[test]
    fn test_nearest_mean() {
        let means = array![[1.0, 0.0], [0.0, 1.0]];
        let features = array![[3.0, 0.5], [0.2, 4.0], [-1.0, 0.1]];
        assert_eq!(nearest_mean(&features, &means), vec![0, 1, 1]);
    }

    #[test]
    fn test_nearest_mean_skips_classes_without_exemplars() {
        // The zero row is closer to [-1, 0.2] than either real mean
        let means = array![[1.0, 0.0], [0.0, 0.0], [0.0, 1.0]];
        let features = array![[-1.0, 0.2], [2.0, 0.1]];
        assert_eq!(nearest_mean(&features, &means), vec![2, 0]);
    }
}
