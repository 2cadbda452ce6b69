//! Trial results and the accumulated search state.

use serde::{Deserialize, Serialize};

use crate::params::Configuration;
use crate::run::{ArtifactRef, RunId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrialStatus {
    Completed,
    Failed,
}

/// Result of a single trial. Created once when the trial finishes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrialResult {
    /// Proposal order, 0-indexed.
    pub trial_number: usize,
    pub configuration: Configuration,
    /// Lower is better. `+inf` for failed or diverged trials.
    #[serde(with = "crate::float")]
    pub score: f64,
    pub artifact: Option<ArtifactRef>,
    pub run_id: RunId,
    pub status: TrialStatus,
    pub error: Option<String>,
    pub duration_ms: u64,
}

impl TrialResult {
    pub fn is_usable(&self) -> bool {
        self.status == TrialStatus::Completed && self.score.is_finite() && self.artifact.is_some()
    }
}

/// Ordered, append-only history of finished trials.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchState {
    trials: Vec<TrialResult>,
}

impl SearchState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, result: TrialResult) {
        self.trials.push(result);
    }

    pub fn trials(&self) -> &[TrialResult] {
        &self.trials
    }

    pub fn len(&self) -> usize {
        self.trials.len()
    }

    pub fn is_empty(&self) -> bool {
        self.trials.is_empty()
    }

    pub fn succeeded(&self) -> usize {
        self.trials
            .iter()
            .filter(|t| t.status == TrialStatus::Completed)
            .count()
    }

    pub fn failed(&self) -> usize {
        self.len() - self.succeeded()
    }

    /// The trial with the minimum score. A later trial replaces the current
    /// best only on a strictly lower score, so ties keep the earliest trial.
    pub fn best(&self) -> Option<&TrialResult> {
        let mut best: Option<&TrialResult> = None;
        for trial in &self.trials {
            let replace = match best {
                None => true,
                Some(current) => trial.score < current.score,
            };
            if replace {
                best = Some(trial);
            }
        }
        best
    }

    pub fn into_trials(self) -> Vec<TrialResult> {
        self.trials
    }
}
