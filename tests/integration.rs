//! Integration tests for class-incremental sessions
//!
//! These tests drive complete multi-step sessions on synthetic data.

use class_incremental::prelude::*;

const SHAPE: [usize; 3] = [1, 3, 3];

/// Helper to build a small, fast session configuration
fn session_config(method: &str, num_classes: usize, num_groups: usize) -> LearnerConfig {
    let mut config = LearnerConfig::for_method(method, num_classes, num_groups);
    config.seed = Some(42);
    config.splitter_seed = 42;
    config.backbone = BackboneConfig::small(SHAPE);
    config.train = TrainParams {
        num_epochs: 4,
        batch_size: 16,
        step_milestones: vec![3],
        ..TrainParams::quick()
    };
    config
}

/// Helper to create train and test data sharing class prototypes
fn create_data(num_classes: usize) -> (ImageDataset, ImageDataset) {
    let generator = SyntheticImages::new(num_classes, SHAPE, 0.05, 42);
    (
        generator.generate(12, 0).unwrap(),
        generator.generate(6, 1).unwrap(),
    )
}

fn run_session(config: LearnerConfig) -> (IncrementalLearner, Vec<StepReport>) {
    let (train, test) = create_data(config.num_classes);
    let mut learner = IncrementalLearner::new(config).unwrap();
    let reports = (0..learner.num_groups())
        .map(|_| learner.run_step(&train, &test).unwrap())
        .collect();
    (learner, reports)
}

fn assert_reports_sane(reports: &[StepReport], classes_per_group: usize) {
    for (i, report) in reports.iter().enumerate() {
        assert_eq!(report.step, i);
        assert_eq!(report.n_known_classes, (i + 1) * classes_per_group);
        assert!((0.0..=1.0).contains(&report.accuracy));
        assert!(report
            .training
            .epoch_losses
            .iter()
            .all(|loss| loss.is_finite()));
    }
}

#[test]
fn test_icarl_session() {
    let mut config = session_config("ICARL", 6, 3);
    config.approach.n_exemplars = 12;
    let (learner, reports) = run_session(config);

    assert_reports_sane(&reports, 2);
    assert_eq!(learner.state(), LearnerState::ExemplarsUpdated);
    assert_eq!(learner.model().num_classes(), 6);

    // Quotas: 12/2 = 6, 12/4 = 3, 12/6 = 2
    assert_eq!(reports[0].num_exemplars, 12);
    assert_eq!(reports[1].num_exemplars, 12);
    assert_eq!(reports[2].num_exemplars, 12);
    for report in &reports {
        assert!(report.num_exemplars <= 12);
        let nme = report.nme_accuracy.unwrap();
        assert!((0.0..=1.0).contains(&nme));
    }
}

#[test]
fn test_variation_session() {
    let (learner, reports) = run_session(session_config("variation", 6, 3));

    assert_reports_sane(&reports, 2);
    assert!(reports[0].finetuning.is_none());
    for report in &reports[1..] {
        let finetuning = report.finetuning.as_ref().unwrap();
        assert_eq!(finetuning.epoch_losses.len(), 4);
    }
    assert_eq!(learner.finetuned_model().unwrap().num_classes(), 6);
    assert_eq!(learner.previous_model().unwrap().num_classes(), 4);
}

#[test]
fn test_cosine_session() {
    let mut config = session_config("ICARL", 4, 2);
    config.approach.use_cosine = true;
    config.approach.distillation_loss = Some(DistillationLoss::Lfc);
    let (learner, reports) = run_session(config);

    assert_reports_sane(&reports, 2);
    assert!(learner.model().head().is_cosine());
    assert!(learner.model().head().sigma().unwrap().is_finite());
}

#[test]
fn test_finetuning_session_keeps_no_memory() {
    let (learner, reports) = run_session(session_config("FINETUNING", 4, 2));

    assert_reports_sane(&reports, 2);
    assert!(learner.previous_model().is_none());
    assert!(learner.exemplars().is_empty());
    assert!(reports.iter().all(|r| r.nme_accuracy.is_none()));
}

#[test]
fn test_random_selection_session() {
    let mut config = session_config("ICARL", 4, 2);
    config.approach.n_exemplars = 8;
    config.approach.exemplars_selection = SelectionPolicy::Random;
    let (learner, _) = run_session(config);

    assert_eq!(learner.exemplars().num_classes(), 4);
    for class in 0..4 {
        let samples = learner.exemplars().class(class).unwrap();
        assert_eq!(samples.len(), 2);
        assert!(samples.iter().all(|s| s.label == class));
    }
}

#[test]
fn test_zero_quota_session() {
    let mut config = session_config("ICARL", 6, 3);
    config.approach.n_exemplars = 3;
    let (learner, reports) = run_session(config);

    // 3/2 = 1, then 3/4 = 0 empties the memory
    assert_eq!(reports[0].num_exemplars, 2);
    assert_eq!(reports[1].num_exemplars, 0);
    assert!(learner.exemplars().is_empty());
    assert_eq!(learner.exemplars().num_classes(), 6);
}

#[test]
fn test_separable_data_is_learned() {
    let mut config = session_config("FINETUNING", 2, 1);
    config.train.num_epochs = 20;
    config.train.step_milestones = vec![15];
    let (_, reports) = run_session(config);
    assert!(reports[0].accuracy >= 0.75);
}

#[test]
fn test_config_file_round_trip() {
    let config = session_config("LWF", 4, 2);
    let path = std::env::temp_dir().join("class_incremental_integration_config.json");
    config.save(&path).unwrap();
    let loaded = LearnerConfig::load(&path).unwrap();
    std::fs::remove_file(&path).ok();

    assert_eq!(loaded, config);
    let (_, reports) = run_session(loaded);
    assert_eq!(reports.len(), 2);
}
