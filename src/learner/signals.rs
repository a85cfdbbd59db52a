//! Choice of classification and distillation signals for one batch

use ndarray::{s, Array2};

use crate::loss::{LossOutput, Target};
use crate::{IncrementalError, Result};

/// Outputs of the model being trained for one batch
#[derive(Debug, Clone, Copy)]
pub struct BatchOutputs<'a> {
    pub logits: &'a Array2<f64>,
    pub features: &'a Array2<f64>,
    /// One-hot labels over every known class
    pub labels: &'a Array2<f64>,
}

/// Frozen reference outputs, present once distillation is active
#[derive(Debug, Clone, Copy)]
pub struct ReferenceOutputs<'a> {
    /// Previous-step model logits over the previously known classes
    pub logits: &'a Array2<f64>,
    pub features: &'a Array2<f64>,
    /// Auxiliary fine-tuned model logits over every known class
    pub finetuned: Option<&'a Array2<f64>>,
}

/// Which model output a signal was cut from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignalSource {
    /// Logit columns `start..end`
    Logits { start: usize, end: usize },
    Features,
}

#[derive(Debug, Clone)]
pub struct Signal {
    pub input: Array2<f64>,
    pub target: Target,
    pub source: SignalSource,
}

/// Inputs and targets handed to the composite loss
#[derive(Debug, Clone)]
pub struct Signals {
    pub classification: Signal,
    pub distillation: Option<Signal>,
}

/// Pick the loss signals for a batch.
///
/// Without a reference the full logits are matched against the one-hot
/// labels. With a reference:
/// - a linear head restricts classification to the `n_new` trailing columns,
///   targeting the fine-tuned logits when available and the labels otherwise,
///   and distils the leading columns against the previous logits;
/// - a cosine head keeps the full classification signal and distils the
///   features against the previous features.
pub fn select_signals(
    outputs: BatchOutputs<'_>,
    reference: Option<ReferenceOutputs<'_>>,
    n_new: usize,
    cosine: bool,
) -> Result<Signals> {
    let n_known = outputs.logits.ncols();
    if outputs.labels.dim() != outputs.logits.dim() {
        return Err(IncrementalError::ShapeMismatch(format!(
            "labels {:?} do not match logits {:?}",
            outputs.labels.dim(),
            outputs.logits.dim()
        )));
    }
    if n_new == 0 || n_new > n_known {
        return Err(IncrementalError::ShapeMismatch(format!(
            "{} new classes out of {} outputs",
            n_new, n_known
        )));
    }

    let full = Signal {
        input: outputs.logits.clone(),
        target: Target::Labels(outputs.labels.clone()),
        source: SignalSource::Logits {
            start: 0,
            end: n_known,
        },
    };

    let Some(reference) = reference else {
        return Ok(Signals {
            classification: full,
            distillation: None,
        });
    };

    let n_old = n_known - n_new;

    if cosine {
        return Ok(Signals {
            classification: full,
            distillation: Some(Signal {
                input: outputs.features.clone(),
                target: Target::Features(reference.features.clone()),
                source: SignalSource::Features,
            }),
        });
    }

    let class_target = match reference.finetuned {
        Some(finetuned) => {
            if finetuned.ncols() != n_known {
                return Err(IncrementalError::ShapeMismatch(format!(
                    "fine-tuned model has {} outputs, expected {}",
                    finetuned.ncols(),
                    n_known
                )));
            }
            Target::Logits(finetuned.slice(s![.., n_old..]).to_owned())
        }
        None => Target::Labels(outputs.labels.slice(s![.., n_old..]).to_owned()),
    };

    Ok(Signals {
        classification: Signal {
            input: outputs.logits.slice(s![.., n_old..]).to_owned(),
            target: class_target,
            source: SignalSource::Logits {
                start: n_old,
                end: n_known,
            },
        },
        distillation: Some(Signal {
            input: outputs.logits.slice(s![.., ..n_old]).to_owned(),
            target: Target::Logits(reference.logits.clone()),
            source: SignalSource::Logits { start: 0, end: n_old },
        }),
    })
}

impl Signals {
    /// Scatter the loss gradients back onto the full logits and, when the
    /// distillation signal came from the features, onto the features
    pub fn route_gradients(
        &self,
        loss: &LossOutput,
        logits_dim: (usize, usize),
        features_dim: (usize, usize),
    ) -> Result<(Array2<f64>, Option<Array2<f64>>)> {
        let mut grad_logits = Array2::zeros(logits_dim);
        let mut grad_features = None;

        let mut scatter = |source: &SignalSource, grad: &Array2<f64>| -> Result<()> {
            match source {
                SignalSource::Logits { start, end } => {
                    let mut target = grad_logits.slice_mut(s![.., *start..*end]);
                    if target.dim() != grad.dim() {
                        return Err(IncrementalError::ShapeMismatch(format!(
                            "gradient {:?} does not fit logit columns {}..{}",
                            grad.dim(),
                            start,
                            end
                        )));
                    }
                    target += grad;
                }
                SignalSource::Features => {
                    if grad.dim() != features_dim {
                        return Err(IncrementalError::ShapeMismatch(format!(
                            "gradient {:?} does not fit features {:?}",
                            grad.dim(),
                            features_dim
                        )));
                    }
                    grad_features = Some(grad.clone());
                }
            }
            Ok(())
        };

        scatter(&self.classification.source, &loss.class_grad)?;
        if let (Some(signal), Some(grad)) = (&self.distillation, &loss.distillation_grad) {
            scatter(&signal.source, grad)?;
        }

        Ok((grad_logits, grad_features))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::one_hot;
    use ndarray::array;

    fn batch() -> (Array2<f64>, Array2<f64>, Array2<f64>) {
        let logits = array![[0.1, 0.2, 0.3, 0.4], [1.1, 1.2, 1.3, 1.4]];
        let features = array![[1.0, 2.0, 3.0], [4.0, 5.0, 6.0]];
        let labels = one_hot(&[3, 0], 4).unwrap();
        (logits, features, labels)
    }

    #[test]
    fn test_first_step_uses_full_outputs() {
        let (logits, features, labels) = batch();
        let outputs = BatchOutputs {
            logits: &logits,
            features: &features,
            labels: &labels,
        };
        let signals = select_signals(outputs, None, 4, false).unwrap();

        assert_eq!(signals.classification.input, logits);
        assert_eq!(signals.classification.target, Target::Labels(labels));
        assert!(signals.distillation.is_none());
    }

    #[test]
    fn test_linear_head_with_distillation() {
        let (logits, features, labels) = batch();
        let prev_logits = array![[9.0, 8.0], [7.0, 6.0]];
        let prev_features = Array2::zeros((2, 3));
        let signals = select_signals(
            BatchOutputs {
                logits: &logits,
                features: &features,
                labels: &labels,
            },
            Some(ReferenceOutputs {
                logits: &prev_logits,
                features: &prev_features,
                finetuned: None,
            }),
            2,
            false,
        )
        .unwrap();

        assert_eq!(signals.classification.input, array![[0.3, 0.4], [1.3, 1.4]]);
        assert_eq!(
            signals.classification.target,
            Target::Labels(array![[0.0, 1.0], [0.0, 0.0]])
        );

        let distillation = signals.distillation.unwrap();
        assert_eq!(distillation.input, array![[0.1, 0.2], [1.1, 1.2]]);
        assert_eq!(distillation.target, Target::Logits(prev_logits));
        assert_eq!(distillation.source, SignalSource::Logits { start: 0, end: 2 });
    }

    #[test]
    fn test_variation_targets_come_from_finetuned_model() {
        let (logits, features, labels) = batch();
        let prev_logits = Array2::zeros((2, 2));
        let prev_features = Array2::zeros((2, 3));
        let finetuned = array![[5.0, 6.0, 7.0, 8.0], [-1.0, -2.0, -3.0, -4.0]];

        let signals = select_signals(
            BatchOutputs {
                logits: &logits,
                features: &features,
                labels: &labels,
            },
            Some(ReferenceOutputs {
                logits: &prev_logits,
                features: &prev_features,
                finetuned: Some(&finetuned),
            }),
            2,
            false,
        )
        .unwrap();

        assert_eq!(
            signals.classification.target,
            Target::Logits(array![[7.0, 8.0], [-3.0, -4.0]])
        );
    }

    #[test]
    fn test_cosine_head_distils_features() {
        let (logits, features, labels) = batch();
        let prev_logits = Array2::zeros((2, 2));
        let prev_features = array![[0.5, 0.5, 0.5], [1.0, 0.0, 1.0]];
        let finetuned = Array2::ones((2, 4));

        let signals = select_signals(
            BatchOutputs {
                logits: &logits,
                features: &features,
                labels: &labels,
            },
            Some(ReferenceOutputs {
                logits: &prev_logits,
                features: &prev_features,
                finetuned: Some(&finetuned),
            }),
            2,
            true,
        )
        .unwrap();

        assert_eq!(signals.classification.input, logits);
        assert_eq!(signals.classification.target, Target::Labels(labels));
        let distillation = signals.distillation.unwrap();
        assert_eq!(distillation.input, features);
        assert_eq!(distillation.target, Target::Features(prev_features));
    }

    #[test]
    fn test_route_gradients() {
        let (logits, features, labels) = batch();
        let prev_logits = Array2::zeros((2, 2));
        let prev_features = Array2::zeros((2, 3));
        let signals = select_signals(
            BatchOutputs {
                logits: &logits,
                features: &features,
                labels: &labels,
            },
            Some(ReferenceOutputs {
                logits: &prev_logits,
                features: &prev_features,
                finetuned: None,
            }),
            2,
            false,
        )
        .unwrap();

        let loss = LossOutput {
            value: 0.0,
            classification: 0.0,
            distillation: Some(0.0),
            class_grad: Array2::ones((2, 2)),
            distillation_grad: Some(Array2::from_elem((2, 2), -1.0)),
        };
        let (grad_logits, grad_features) =
            signals.route_gradients(&loss, (2, 4), (2, 3)).unwrap();

        assert_eq!(grad_logits.row(0).to_vec(), vec![-1.0, -1.0, 1.0, 1.0]);
        assert!(grad_features.is_none());
    }

    #[test]
    fn test_rejects_bad_widths() {
        let (logits, features, labels) = batch();
        let outputs = BatchOutputs {
            logits: &logits,
            features: &features,
            labels: &labels,
        };
        assert!(select_signals(outputs, None, 5, false).is_err());
        assert!(select_signals(outputs, None, 0, false).is_err());
    }
}
