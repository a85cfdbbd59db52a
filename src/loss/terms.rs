//! Individual loss terms, each returning `(value, gradient w.r.t. input)`

use ndarray::{Array2, Axis};

use crate::nn::functional::{l2_norm, sigmoid, softmax_rows, NORM_EPS};

/// Sigmoid binary cross-entropy with logits, averaged over all elements
pub fn binary_cross_entropy(logits: &Array2<f64>, targets: &Array2<f64>) -> (f64, Array2<f64>) {
    let n = logits.len().max(1) as f64;
    let mut loss = 0.0;
    let mut grad = Array2::zeros(logits.dim());

    ndarray::Zip::from(&mut grad)
        .and(logits)
        .and(targets)
        .for_each(|g, &x, &t| {
            // max(x, 0) - x * t + ln(1 + e^{-|x|})
            loss += x.max(0.0) - x * t + (-x.abs()).exp().ln_1p();
            *g = (sigmoid(x) - t) / n;
        });

    (loss / n, grad)
}

/// Softmax cross-entropy against target distributions, averaged over rows
pub fn cross_entropy(logits: &Array2<f64>, targets: &Array2<f64>) -> (f64, Array2<f64>) {
    let batch = logits.nrows().max(1) as f64;
    let probs = softmax_rows(logits);

    let loss = -(targets * &probs.mapv(|p| p.max(1e-300).ln())).sum() / batch;
    let target_mass = targets.sum_axis(Axis(1)).insert_axis(Axis(1));
    let grad = (&probs * &target_mass - targets) / batch;

    (loss, grad)
}

/// One minus cosine similarity per row, averaged over rows
pub fn cosine_embedding(inputs: &Array2<f64>, targets: &Array2<f64>) -> (f64, Array2<f64>) {
    let batch = inputs.nrows().max(1) as f64;
    let mut loss = 0.0;
    let mut grad = Array2::zeros(inputs.dim());

    for (i, mut grad_row) in grad.rows_mut().into_iter().enumerate() {
        let a = inputs.row(i);
        let b = targets.row(i);
        let norm_a = l2_norm(a).max(NORM_EPS);
        let norm_b = l2_norm(b).max(NORM_EPS);
        let cosine = a.dot(&b) / (norm_a * norm_b);
        loss += 1.0 - cosine;

        // d(cos)/da = b / (|a||b|) - cos * a / |a|^2
        for j in 0..a.len() {
            let d_cos = b[j] / (norm_a * norm_b) - cosine * a[j] / (norm_a * norm_a);
            grad_row[j] = -d_cos / batch;
        }
    }

    (loss / batch, grad)
}

/// Mean squared error over all elements
pub fn mean_squared_error(inputs: &Array2<f64>, targets: &Array2<f64>) -> (f64, Array2<f64>) {
    let n = inputs.len().max(1) as f64;
    let diff = inputs - targets;
    let loss = diff.mapv(|d| d * d).sum() / n;
    (loss, diff * (2.0 / n))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    fn check_gradient<F>(f: F, x: &Array2<f64>, analytic: &Array2<f64>)
    where
        F: Fn(&Array2<f64>) -> f64,
    {
        let h = 1e-6;
        for ((i, j), &g) in analytic.indexed_iter() {
            let mut plus = x.clone();
            plus[[i, j]] += h;
            let mut minus = x.clone();
            minus[[i, j]] -= h;
            let numeric = (f(&plus) - f(&minus)) / (2.0 * h);
            assert_abs_diff_eq!(g, numeric, epsilon = 1e-6);
        }
    }

    #[test]
    fn test_bce_value() {
        let (loss, _) = binary_cross_entropy(&array![[0.0]], &array![[1.0]]);
        assert_abs_diff_eq!(loss, std::f64::consts::LN_2, epsilon = 1e-12);
    }

    #[test]
    fn test_bce_gradient() {
        let x = array![[0.5, -1.5], [2.0, 0.1]];
        let t = array![[1.0, 0.0], [0.3, 0.8]];
        let (_, grad) = binary_cross_entropy(&x, &t);
        check_gradient(|v| binary_cross_entropy(v, &t).0, &x, &grad);
    }

    #[test]
    fn test_cross_entropy_gradient() {
        let x = array![[0.2, -0.4, 1.0], [1.5, 0.0, -2.0]];
        let t = array![[0.0, 0.0, 1.0], [0.2, 0.8, 0.0]];
        let (loss, grad) = cross_entropy(&x, &t);
        assert!(loss > 0.0);
        check_gradient(|v| cross_entropy(v, &t).0, &x, &grad);
    }

    #[test]
    fn test_cosine_embedding() {
        let a = array![[1.0, 2.0, -0.5]];
        let (loss, _) = cosine_embedding(&a, &(&a * 3.0));
        assert_abs_diff_eq!(loss, 0.0, epsilon = 1e-12);

        let b = array![[0.3, -1.0, 0.4]];
        let (_, grad) = cosine_embedding(&a, &b);
        check_gradient(|v| cosine_embedding(v, &b).0, &a, &grad);
    }

    #[test]
    fn test_mse() {
        let (loss, grad) = mean_squared_error(&array![[1.0, 3.0]], &array![[0.0, 1.0]]);
        assert_abs_diff_eq!(loss, 2.5, epsilon = 1e-12);
        assert_eq!(grad, array![[1.0, 2.0]]);
    }
}
