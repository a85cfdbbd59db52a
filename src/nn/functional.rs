//! Row-wise vector helpers shared by heads, losses and exemplar selection

use ndarray::{Array1, Array2, ArrayView1, Axis};

/// Norms below this are treated as this value
pub const NORM_EPS: f64 = 1e-12;

pub fn l2_norm(v: ArrayView1<f64>) -> f64 {
    v.dot(&v).sqrt()
}

/// `v / max(||v||, eps)`
pub fn l2_normalize(v: ArrayView1<f64>) -> Array1<f64> {
    let norm = l2_norm(v).max(NORM_EPS);
    v.mapv(|x| x / norm)
}

/// Normalise every row; also returns the clamped row norms for backward passes
pub fn l2_normalize_rows(x: &Array2<f64>) -> (Array2<f64>, Array1<f64>) {
    let norms = x.map_axis(Axis(1), |row| l2_norm(row).max(NORM_EPS));
    let mut out = x.clone();
    for (mut row, &norm) in out.rows_mut().into_iter().zip(norms.iter()) {
        row.mapv_inplace(|v| v / norm);
    }
    (out, norms)
}

/// Gradient of row normalisation.
///
/// With `y = x / ||x||`, `dx = (dy - y * <y, dy>) / ||x||`.
pub fn l2_normalize_rows_backward(
    normalized: &Array2<f64>,
    norms: &Array1<f64>,
    grad: &Array2<f64>,
) -> Array2<f64> {
    let mut out = grad.clone();
    for (i, mut row) in out.rows_mut().into_iter().enumerate() {
        let y = normalized.row(i);
        let projection = y.dot(&grad.row(i));
        row.zip_mut_with(&y, |g, &yv| *g -= yv * projection);
        row.mapv_inplace(|g| g / norms[i]);
    }
    out
}

pub fn sigmoid(x: f64) -> f64 {
    if x >= 0.0 {
        1.0 / (1.0 + (-x).exp())
    } else {
        let e = x.exp();
        e / (1.0 + e)
    }
}

/// Numerically stable softmax over each row
pub fn softmax_rows(x: &Array2<f64>) -> Array2<f64> {
    let mut out = x.clone();
    for mut row in out.rows_mut() {
        let max = row.fold(f64::NEG_INFINITY, |m, &v| m.max(v));
        row.mapv_inplace(|v| (v - max).exp());
        let sum = row.sum();
        row.mapv_inplace(|v| v / sum);
    }
    out
}

/// Index of the largest value in each row
pub fn argmax_rows(x: &Array2<f64>) -> Vec<usize> {
    x.rows()
        .into_iter()
        .map(|row| {
            row.iter()
                .enumerate()
                .fold((0, f64::NEG_INFINITY), |(bi, bv), (i, &v)| {
                    if v > bv {
                        (i, v)
                    } else {
                        (bi, bv)
                    }
                })
                .0
        })
        .collect()
}
