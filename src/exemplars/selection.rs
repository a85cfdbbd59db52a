//! Exemplar quota and selection policies

use ndarray::{Array1, Array2, Axis};
use rand::Rng;

use crate::nn::functional::{l2_normalize, l2_normalize_rows};

/// Per-class quota `floor(capacity / n_known)`; zero before any class is known
pub fn exemplar_quota(capacity: usize, n_known: usize) -> usize {
    if n_known == 0 {
        return 0;
    }
    capacity / n_known
}

/// Greedy herding over the rows of `features`.
///
/// Rows are L2-normalised first. At every iteration the sample whose
/// normalised sum with the already chosen samples lies closest to the
/// normalised class mean is taken. Returns `min(count, n)` distinct indices in
/// selection order.
pub fn herding_selection(features: &Array2<f64>, count: usize) -> Vec<usize> {
    let n = features.nrows();
    let count = count.min(n);
    if count == 0 {
        return Vec::new();
    }

    let (normalized, _) = l2_normalize_rows(features);
    let Some(mean) = normalized.mean_axis(Axis(0)) else {
        return Vec::new();
    };
    let class_mean = l2_normalize(mean.view());

    let mut running: Array1<f64> = Array1::zeros(normalized.ncols());
    let mut taken = vec![false; n];
    let mut selected = Vec::with_capacity(count);

    for _ in 0..count {
        let mut best: Option<(usize, f64)> = None;
        for (i, row) in normalized.axis_iter(Axis(0)).enumerate() {
            if taken[i] {
                continue;
            }
            let candidate = l2_normalize((&row + &running).view());
            let distance = (&class_mean - &candidate).mapv(|d| d * d).sum();
            if best.map_or(true, |(_, d)| distance < d) {
                best = Some((i, distance));
            }
        }

        let Some((index, _)) = best else { break };
        taken[index] = true;
        running += &normalized.row(index);
        selected.push(index);
    }

    selected
}

/// Uniform sample of `min(count, n)` distinct indices out of `0..n`
pub fn random_selection<R: Rng + ?Sized>(n: usize, count: usize, rng: &mut R) -> Vec<usize> {
    rand::seq::index::sample(rng, n, count.min(n)).into_vec()
}
