//! Incremental step controller
//!
//! [`IncrementalLearner`] owns the model being trained, the frozen snapshot of
//! the previous step, the optional auxiliary fine-tuned model and the exemplar
//! memory. Each step runs:
//!
//! 1. [`IncrementalLearner::step`] - advance to the next class group
//! 2. [`IncrementalLearner::update_nets`] - snapshot, grow the head, reset the optimizer
//! 3. [`IncrementalLearner::train_ft`] - optional, fine-tune the auxiliary model
//! 4. [`IncrementalLearner::train`] - distillation-aware training
//! 5. [`IncrementalLearner::update_exemplars`] - truncate and select exemplars
//!
//! [`IncrementalLearner::run_step`] performs the whole sequence.

mod signals;
mod state;

pub use signals::{select_signals, BatchOutputs, ReferenceOutputs, Signal, SignalSource, Signals};
pub use state::LearnerState;

use ndarray::{concatenate, Array2, Axis};
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::{LearnerConfig, SelectionPolicy};
use crate::data::{one_hot, Batch, ImageDataset, LabelSplitter};
use crate::exemplars::{
    exemplar_quota, herding_selection, nearest_mean, random_selection, ExemplarSet,
};
use crate::loss::{CompositeLoss, Target};
use crate::nn::functional::argmax_rows;
use crate::nn::{kaiming_rows, Backbone, Classifier, Head, MultiStepLr, Sgd};
use crate::{IncrementalError, Result};

/// Outcome of one training pass
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingReport {
    /// Mean batch loss of every epoch
    pub epoch_losses: Vec<f64>,
    /// Learning rate after the last schedule step
    pub final_learning_rate: f64,
}

impl TrainingReport {
    pub fn final_loss(&self) -> Option<f64> {
        self.epoch_losses.last().copied()
    }
}

/// Summary of a complete incremental step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepReport {
    pub step: usize,
    pub n_known_classes: usize,
    pub training: TrainingReport,
    /// Present when the auxiliary model was trained
    pub finetuning: Option<TrainingReport>,
    pub num_exemplars: usize,
    /// Accuracy of the classification head over all known classes
    pub accuracy: f64,
    /// Nearest-mean-of-exemplars accuracy, when exemplars are stored
    pub nme_accuracy: Option<f64>,
}

/// Trainable copy of the current model used for variation targets
#[derive(Debug, Clone)]
struct AuxiliaryModel {
    model: Classifier,
    optimizer: Sgd,
    scheduler: MultiStepLr,
}

impl AuxiliaryModel {
    fn new(model: Classifier, config: &LearnerConfig) -> Self {
        Self {
            model,
            optimizer: Sgd::from_params(&config.train),
            scheduler: MultiStepLr::from_params(&config.train),
        }
    }
}

/// Class-incremental learning session
#[derive(Debug)]
pub struct IncrementalLearner {
    config: LearnerConfig,
    splitter: LabelSplitter,
    model: Classifier,
    /// Rows appended to the head at every growth, drawn once at construction
    init_rows: Array2<f64>,
    optimizer: Sgd,
    scheduler: MultiStepLr,
    loss: CompositeLoss,
    prev_model: Option<Classifier>,
    finetuned: Option<AuxiliaryModel>,
    ft_loss: CompositeLoss,
    exemplars: ExemplarSet,
    current_step: Option<usize>,
    n_known_classes: usize,
    state: LearnerState,
    rng: StdRng,
}

impl IncrementalLearner {
    pub fn new(config: LearnerConfig) -> Result<Self> {
        config.validate()?;

        let splitter =
            LabelSplitter::new(config.num_classes, config.num_groups, config.splitter_seed)?;
        let mut rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };

        let cosine = config.approach.use_cosine;
        let backbone = Backbone::new(&config.backbone, cosine, &mut rng)?;
        let init_rows = kaiming_rows(config.classes_per_group(), backbone.feature_dim(), &mut rng)?;
        let head = if cosine {
            Head::cosine(init_rows.clone())
        } else {
            Head::linear(init_rows.clone())
        };
        let model = Classifier::new(backbone, head)?;

        info!(
            classes = config.num_classes,
            groups = config.num_groups,
            cosine,
            distillation = config.approach.use_distillation,
            variation = config.approach.variation_enabled(),
            exemplars = config.approach.use_exemplars,
            parameters = model.num_parameters(),
            "Created incremental learner"
        );

        Ok(Self {
            optimizer: Sgd::from_params(&config.train),
            scheduler: MultiStepLr::from_params(&config.train),
            loss: CompositeLoss::new(
                config.approach.classification_loss,
                config.approach.distillation_loss,
            ),
            ft_loss: CompositeLoss::new(config.approach.classification_loss, None),
            config,
            splitter,
            model,
            init_rows,
            prev_model: None,
            finetuned: None,
            exemplars: ExemplarSet::new(),
            current_step: None,
            n_known_classes: 0,
            state: LearnerState::Uninitialized,
            rng,
        })
    }

    pub fn config(&self) -> &LearnerConfig {
        &self.config
    }

    pub fn splitter(&self) -> &LabelSplitter {
        &self.splitter
    }

    pub fn model(&self) -> &Classifier {
        &self.model
    }

    /// Frozen snapshot of the model at the end of the previous step
    pub fn previous_model(&self) -> Option<&Classifier> {
        self.prev_model.as_ref()
    }

    /// Auxiliary fine-tuned model of the current step
    pub fn finetuned_model(&self) -> Option<&Classifier> {
        self.finetuned.as_ref().map(|aux| &aux.model)
    }

    pub fn exemplars(&self) -> &ExemplarSet {
        &self.exemplars
    }

    pub fn state(&self) -> LearnerState {
        self.state
    }

    /// `None` until the first call to [`IncrementalLearner::step`]
    pub fn current_step(&self) -> Option<usize> {
        self.current_step
    }

    pub fn n_known_classes(&self) -> usize {
        self.n_known_classes
    }

    pub fn num_groups(&self) -> usize {
        self.splitter.num_groups()
    }

    pub fn classes_per_group(&self) -> usize {
        self.splitter.classes_per_group()
    }

    /// Original labels introduced at the current step
    pub fn new_labels(&self) -> Option<&[usize]> {
        self.current_step.and_then(|step| self.splitter.group(step))
    }

    /// Original labels of every class seen so far, in introduction order
    pub fn known_labels(&self) -> Vec<usize> {
        match self.current_step {
            Some(step) => self.splitter.groups()[..=step].concat(),
            None => Vec::new(),
        }
    }

    fn started(&self, operation: &'static str) -> Result<usize> {
        self.current_step.ok_or(IncrementalError::OutOfOrder {
            operation,
            state: self.state,
        })
    }

    /// Advance to the next class group
    pub fn step(&mut self) -> Result<()> {
        self.state.require(
            "step",
            &[LearnerState::Uninitialized, LearnerState::ExemplarsUpdated],
        )?;

        let next = self.current_step.map_or(0, |step| step + 1);
        if next >= self.splitter.num_groups() {
            return Err(IncrementalError::StepOutOfRange {
                step: next,
                num_groups: self.splitter.num_groups(),
            });
        }

        self.current_step = Some(next);
        self.n_known_classes += self.classes_per_group();
        self.state = LearnerState::StepAdvanced;

        info!(
            step = next,
            n_known = self.n_known_classes,
            "Starting incremental step"
        );
        Ok(())
    }

    /// Prepare the networks for the current step.
    ///
    /// Nothing changes on the first step. Afterwards the current model is
    /// snapshotted (with distillation), the head grows by one block of the
    /// fixed initial rows, the optimizer and schedule are rebuilt, and (with
    /// variation) the grown model is copied into the auxiliary model.
    pub fn update_nets(&mut self) -> Result<()> {
        self.state
            .require("update_nets", &[LearnerState::StepAdvanced])?;
        let step = self.started("update_nets")?;

        if step > 0 {
            info!(step, "Updating networks");

            if self.config.approach.use_distillation {
                self.prev_model = Some(self.model.clone());
            }

            let head = self.model.head().grow(&self.init_rows)?;
            self.model.replace_head(head)?;
            debug!(
                outputs = self.model.num_classes(),
                sigma = ?self.model.head().sigma(),
                "Head grown"
            );

            self.optimizer = Sgd::from_params(&self.config.train);
            self.scheduler = MultiStepLr::from_params(&self.config.train);

            if self.config.approach.variation_enabled() {
                self.finetuned = Some(AuxiliaryModel::new(self.model.clone(), &self.config));
            }
        }

        self.state = LearnerState::NetsUpdated;
        Ok(())
    }

    /// Train the main model on new-class data mixed with exemplars
    pub fn train(&mut self, dataset: &ImageDataset) -> Result<TrainingReport> {
        self.state.require(
            "train",
            &[LearnerState::NetsUpdated, LearnerState::FineTuned],
        )?;
        let step = self.started("train")?;
        if dataset.is_empty() {
            return Err(IncrementalError::EmptyDataset(format!(
                "no training samples for step {}",
                step
            )));
        }

        let n_new = self.classes_per_group();
        let ratio = n_new as f64 / self.n_known_classes as f64;
        let distill = step > 0 && self.config.approach.use_distillation;
        if distill && self.config.approach.variation_enabled() && self.finetuned.is_none() {
            warn!(step, "Variation enabled but no fine-tuned model is available");
        }

        info!(
            step,
            samples = dataset.len(),
            ratio,
            distill,
            "Training the main net"
        );

        let mut epoch_losses = Vec::with_capacity(self.config.train.num_epochs);
        for epoch in 0..self.config.train.num_epochs {
            let batches = dataset.batches(self.config.train.batch_size, true, &mut self.rng)?;
            let mut total = 0.0;
            for batch in &batches {
                total += self.train_batch(batch, n_new, ratio, distill)?;
            }
            let mean = total / batches.len() as f64;
            self.scheduler.step(&mut self.optimizer);
            epoch_losses.push(mean);

            debug!(
                epoch = epoch + 1,
                loss = mean,
                lr = self.optimizer.learning_rate,
                "Main net epoch"
            );
        }

        self.state = LearnerState::Trained;
        Ok(TrainingReport {
            epoch_losses,
            final_learning_rate: self.optimizer.learning_rate,
        })
    }

    /// Loss signals for one batch, querying the frozen snapshot and the
    /// auxiliary model on `images` when distillation is active
    pub(crate) fn batch_signals(
        &self,
        images: &Array2<f64>,
        outputs: BatchOutputs<'_>,
        n_new: usize,
        distill: bool,
    ) -> Result<Signals> {
        let cosine = self.model.head().is_cosine();
        let previous = match (&self.prev_model, distill) {
            (Some(prev), true) => Some(prev.infer_all(images)?),
            _ => None,
        };
        let finetuned = match (&self.finetuned, &previous) {
            (Some(aux), Some(_)) if !cosine => Some(aux.model.infer_logits(images)?),
            _ => None,
        };
        let reference = previous.as_ref().map(|(prev_logits, prev_features)| ReferenceOutputs {
            logits: prev_logits,
            features: prev_features,
            finetuned: finetuned.as_ref(),
        });

        select_signals(outputs, reference, n_new, cosine)
    }

    fn train_batch(&mut self, batch: &Batch, n_new: usize, ratio: f64, distill: bool) -> Result<f64> {
        let labels = one_hot(&batch.labels, self.n_known_classes)?;
        let (logits, features) = self.model.forward_all(&batch.images)?;
        let signals = self.batch_signals(
            &batch.images,
            BatchOutputs {
                logits: &logits,
                features: &features,
                labels: &labels,
            },
            n_new,
            distill,
        )?;

        let loss = self.loss.compute(
            &signals.classification.input,
            &signals.classification.target,
            signals
                .distillation
                .as_ref()
                .map(|signal| (&signal.input, &signal.target)),
            ratio,
        )?;
        let (grad_logits, grad_features) =
            signals.route_gradients(&loss, logits.dim(), features.dim())?;

        self.model.zero_grad();
        self.model.backward(&grad_logits, grad_features.as_ref())?;
        self.optimizer.step(self.model.params_mut())?;

        Ok(loss.value)
    }

    /// Fine-tune the auxiliary model on new-class data only.
    ///
    /// Returns `None` when variation is disabled or no auxiliary model exists
    /// yet (the first step).
    pub fn train_ft(&mut self, dataset: &ImageDataset) -> Result<Option<TrainingReport>> {
        self.state.require(
            "train_ft",
            &[LearnerState::NetsUpdated, LearnerState::Trained],
        )?;
        let step = self.started("train_ft")?;
        let next_state = match self.state {
            LearnerState::NetsUpdated => LearnerState::FineTuned,
            state => state,
        };

        if !self.config.approach.variation_enabled() {
            self.state = next_state;
            return Ok(None);
        }
        let Some(aux) = self.finetuned.as_mut() else {
            if step > 0 {
                warn!(step, "No fine-tuned model to train");
            }
            self.state = next_state;
            return Ok(None);
        };
        if dataset.is_empty() {
            return Err(IncrementalError::EmptyDataset(format!(
                "no new-class samples for step {}",
                step
            )));
        }

        info!(step, samples = dataset.len(), "Training the ft-net");

        let mut epoch_losses = Vec::with_capacity(self.config.train.num_epochs);
        for epoch in 0..self.config.train.num_epochs {
            let batches = dataset.batches(self.config.train.batch_size, true, &mut self.rng)?;
            let mut total = 0.0;
            for batch in &batches {
                let labels = one_hot(&batch.labels, self.n_known_classes)?;
                let logits = aux.model.forward_all(&batch.images)?.0;
                let loss = self
                    .ft_loss
                    .compute(&logits, &Target::Labels(labels), None, 1.0)?;

                aux.model.zero_grad();
                aux.model.backward(&loss.class_grad, None)?;
                aux.optimizer.step(aux.model.params_mut())?;
                total += loss.value;
            }
            let mean = total / batches.len() as f64;
            aux.scheduler.step(&mut aux.optimizer);
            epoch_losses.push(mean);

            debug!(
                epoch = epoch + 1,
                loss = mean,
                lr = aux.optimizer.learning_rate,
                "Ft-net epoch"
            );
        }

        let report = TrainingReport {
            epoch_losses,
            final_learning_rate: aux.optimizer.learning_rate,
        };
        self.state = next_state;
        Ok(Some(report))
    }

    /// Shrink the stored lists to the new quota and select exemplars for the
    /// classes of the current step from `source` (original labels).
    pub fn update_exemplars(&mut self, source: &ImageDataset) -> Result<()> {
        self.state
            .require("update_exemplars", &[LearnerState::Trained])?;
        let step = self.started("update_exemplars")?;

        if !self.config.approach.use_exemplars {
            self.state = LearnerState::ExemplarsUpdated;
            return Ok(());
        }

        let capacity = self.config.approach.n_exemplars;
        let quota = exemplar_quota(capacity, self.n_known_classes);
        info!(step, quota, "Updating exemplars");
        if quota == 0 {
            warn!(
                capacity,
                n_known = self.n_known_classes,
                "Exemplar quota is zero, no exemplars will be kept"
            );
        }

        if step > 0 {
            self.exemplars.truncate_each(quota);
        }

        let policy = self.config.approach.exemplars_selection;
        let new_labels = self.new_labels().map(<[usize]>::to_vec).unwrap_or_default();
        for label in new_labels {
            let class_data = source
                .for_classes(&self.splitter, &[label])?
                .with_transform(self.config.train.test_transform.clone());
            if class_data.is_empty() {
                warn!(label, "No samples to select exemplars from");
            }
            let count = quota.min(class_data.len());

            let selected = match policy {
                _ if count == 0 => Vec::new(),
                SelectionPolicy::Herding => {
                    let features = self.extract_features(&class_data)?;
                    herding_selection(&features, count)
                }
                SelectionPolicy::Random => random_selection(class_data.len(), count, &mut self.rng),
            };

            let samples = selected
                .iter()
                .filter_map(|&index| class_data.get(index).cloned())
                .collect::<Vec<_>>();
            debug!(label, selected = samples.len(), "Stored exemplars");
            self.exemplars.push_class(samples);
        }

        self.state = LearnerState::ExemplarsUpdated;
        Ok(())
    }

    /// Penultimate features of every sample, in dataset order
    fn extract_features(&mut self, dataset: &ImageDataset) -> Result<Array2<f64>> {
        let batches = dataset.batches(self.config.train.batch_size, false, &mut self.rng)?;
        let features = batches
            .iter()
            .map(|batch| self.model.infer_features(&batch.images))
            .collect::<Result<Vec<_>>>()?;
        let views: Vec<_> = features.iter().map(|f| f.view()).collect();
        concatenate(Axis(0), &views).map_err(|e| IncrementalError::ShapeMismatch(e.to_string()))
    }

    /// New-class samples of the current step plus every stored exemplar,
    /// with the training transform attached
    pub fn training_set(&self, source: &ImageDataset) -> Result<ImageDataset> {
        let mut dataset = self.new_class_set(source)?;
        dataset.extend(self.exemplars.samples().cloned());
        Ok(dataset)
    }

    /// New-class samples of the current step with the training transform
    pub fn new_class_set(&self, source: &ImageDataset) -> Result<ImageDataset> {
        self.started("new_class_set")?;
        let labels = self.new_labels().unwrap_or_default();
        Ok(source
            .for_classes(&self.splitter, labels)?
            .with_transform(self.config.train.train_transform.clone()))
    }

    /// Samples of every known class with the evaluation transform
    fn known_class_set(&self, source: &ImageDataset, operation: &'static str) -> Result<ImageDataset> {
        self.started(operation)?;
        let dataset = source
            .for_classes(&self.splitter, &self.known_labels())?
            .with_transform(self.config.train.test_transform.clone());
        if dataset.is_empty() {
            return Err(IncrementalError::EmptyDataset(
                "no samples of the known classes".to_string(),
            ));
        }
        Ok(dataset)
    }

    /// Head accuracy over every known class
    pub fn evaluate(&mut self, source: &ImageDataset) -> Result<f64> {
        let dataset = self.known_class_set(source, "evaluate")?;
        let mut correct = 0;
        for batch in dataset.batches(self.config.train.batch_size, false, &mut self.rng)? {
            let predictions = argmax_rows(&self.model.infer_logits(&batch.images)?);
            correct += predictions
                .iter()
                .zip(&batch.labels)
                .filter(|(p, l)| p == l)
                .count();
        }
        Ok(correct as f64 / dataset.len() as f64)
    }

    /// Nearest-mean-of-exemplars accuracy over every known class
    pub fn evaluate_nme(&mut self, source: &ImageDataset) -> Result<f64> {
        if self.exemplars.is_empty() {
            return Err(IncrementalError::EmptyDataset(
                "no exemplars stored".to_string(),
            ));
        }
        let dataset = self.known_class_set(source, "evaluate_nme")?;
        let means = self.exemplars.class_means(
            &self.model,
            &self.config.train.test_transform,
            self.config.train.batch_size,
            &mut self.rng,
        )?;

        let mut correct = 0;
        for batch in dataset.batches(self.config.train.batch_size, false, &mut self.rng)? {
            let predictions = nearest_mean(&self.model.infer_features(&batch.images)?, &means);
            correct += predictions
                .iter()
                .zip(&batch.labels)
                .filter(|(p, l)| p == l)
                .count();
        }
        Ok(correct as f64 / dataset.len() as f64)
    }

    /// Run a complete step and evaluate the result.
    ///
    /// `train_source` and `test_source` hold samples with original labels.
    pub fn run_step(
        &mut self,
        train_source: &ImageDataset,
        test_source: &ImageDataset,
    ) -> Result<StepReport> {
        self.step()?;
        self.update_nets()?;

        let finetuning = if self.config.approach.variation_enabled() {
            let data = self.new_class_set(train_source)?;
            self.train_ft(&data)?
        } else {
            None
        };

        let data = self.training_set(train_source)?;
        let training = self.train(&data)?;
        self.update_exemplars(train_source)?;

        let accuracy = self.evaluate(test_source)?;
        let nme_accuracy = if self.exemplars.is_empty() {
            None
        } else {
            Some(self.evaluate_nme(test_source)?)
        };

        let report = StepReport {
            step: self.started("run_step")?,
            n_known_classes: self.n_known_classes,
            training,
            finetuning,
            num_exemplars: self.exemplars.len(),
            accuracy,
            nme_accuracy,
        };
        info!(
            step = report.step,
            accuracy = report.accuracy,
            nme_accuracy = ?report.nme_accuracy,
            exemplars = report.num_exemplars,
            "Step complete"
        );
        Ok(report)
    }
}
