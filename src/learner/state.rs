//! Session lifecycle

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::{IncrementalError, Result};

/// Where a session is within the current incremental step.
///
/// The legal order per step is `step -> update_nets -> [train_ft] -> train ->
/// [train_ft] -> update_exemplars`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LearnerState {
    Uninitialized,
    StepAdvanced,
    NetsUpdated,
    FineTuned,
    Trained,
    ExemplarsUpdated,
}

impl LearnerState {
    /// Fail with [`IncrementalError::OutOfOrder`] unless the current state is
    /// one of `allowed`
    pub fn require(self, operation: &'static str, allowed: &[LearnerState]) -> Result<()> {
        if allowed.contains(&self) {
            Ok(())
        } else {
            Err(IncrementalError::OutOfOrder {
                operation,
                state: self,
            })
        }
    }
}

impl fmt::Display for LearnerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LearnerState::Uninitialized => "uninitialized",
            LearnerState::StepAdvanced => "step-advanced",
            LearnerState::NetsUpdated => "nets-updated",
            LearnerState::FineTuned => "fine-tuned",
            LearnerState::Trained => "trained",
            LearnerState::ExemplarsUpdated => "exemplars-updated",
        };
        write!(f, "{}", name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_require() {
        let state = LearnerState::NetsUpdated;
        assert!(state
            .require("train", &[LearnerState::NetsUpdated, LearnerState::FineTuned])
            .is_ok());

        match state.require("update_exemplars", &[LearnerState::Trained]) {
            Err(IncrementalError::OutOfOrder { operation, state }) => {
                assert_eq!(operation, "update_exemplars");
                assert_eq!(state, LearnerState::NetsUpdated);
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn test_display_matches_serde() {
        let json = serde_json::to_string(&LearnerState::ExemplarsUpdated).unwrap();
        assert_eq!(json, format!("\"{}\"", LearnerState::ExemplarsUpdated));
    }
}
