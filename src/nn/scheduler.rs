//! Multi-step learning rate schedule

use serde::{Deserialize, Serialize};

use super::optimizer::Sgd;
use crate::config::TrainParams;

/// Multiplies the base learning rate by `gamma` once for every milestone
/// epoch reached. Stepped once per epoch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MultiStepLr {
    base_lr: f64,
    milestones: Vec<usize>,
    gamma: f64,
    epoch: usize,
}

impl MultiStepLr {
    pub fn new(base_lr: f64, milestones: Vec<usize>, gamma: f64) -> Self {
        let mut milestones = milestones;
        milestones.sort_unstable();
        Self {
            base_lr,
            milestones,
            gamma,
            epoch: 0,
        }
    }

    pub fn from_params(params: &TrainParams) -> Self {
        Self::new(
            params.learning_rate,
            params.step_milestones.clone(),
            params.gamma,
        )
    }

    /// Learning rate for a given epoch
    pub fn lr_at(&self, epoch: usize) -> f64 {
        let decays = self.milestones.iter().filter(|&&m| m <= epoch).count();
        self.base_lr * self.gamma.powi(decays as i32)
    }

    /// Learning rate for the current epoch
    pub fn lr(&self) -> f64 {
        self.lr_at(self.epoch)
    }

    pub fn epoch(&self) -> usize {
        self.epoch
    }

    /// Advance one epoch and push the new rate into the optimizer
    pub fn step(&mut self, optimizer: &mut Sgd) {
        self.epoch += 1;
        optimizer.learning_rate = self.lr();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_milestones() {
        let scheduler = MultiStepLr::new(2.0, vec![63, 49], 0.2);
        assert_abs_diff_eq!(scheduler.lr_at(0), 2.0, epsilon = 1e-12);
        assert_abs_diff_eq!(scheduler.lr_at(48), 2.0, epsilon = 1e-12);
        assert_abs_diff_eq!(scheduler.lr_at(49), 0.4, epsilon = 1e-12);
        assert_abs_diff_eq!(scheduler.lr_at(63), 0.08, epsilon = 1e-12);
    }

    #[test]
    fn test_step_updates_optimizer() {
        let mut scheduler = MultiStepLr::new(1.0, vec![2], 0.5);
        let mut optimizer = Sgd::new(1.0);

        scheduler.step(&mut optimizer);
        assert_abs_diff_eq!(optimizer.learning_rate, 1.0, epsilon = 1e-12);
        scheduler.step(&mut optimizer);
        assert_abs_diff_eq!(optimizer.learning_rate, 0.5, epsilon = 1e-12);
        assert_eq!(scheduler.epoch(), 2);
    }
}
