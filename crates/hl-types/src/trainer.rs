//! The trainer seam: one configuration in, one score and artifact out.

use serde::{Deserialize, Serialize};

use crate::dataset::Dataset;
use crate::errors::TrainerError;
use crate::params::Configuration;

/// Serialized fitted model state, as produced by a trainer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelArtifact {
    pub media_type: String,
    pub bytes: Vec<u8>,
}

impl ModelArtifact {
    pub fn json(bytes: Vec<u8>) -> Self {
        Self {
            media_type: "application/json".to_string(),
            bytes,
        }
    }
}

/// A metric observed during training (e.g. per-epoch training loss).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CurvePoint {
    pub name: String,
    #[serde(with = "crate::float")]
    pub value: f64,
    pub step: u64,
}

/// What a trainer hands back for one trial.
#[derive(Debug, Clone, PartialEq)]
pub struct TrainingOutcome {
    /// Validation score, lower is better. Non-finite means the run diverged.
    pub score: f64,
    pub artifact: ModelArtifact,
    pub curve: Vec<CurvePoint>,
}

/// Trains one model instance per call.
///
/// Implementations must not keep mutable state across calls: trials may run
/// back to back or on several worker threads against the same trainer. A
/// diverged fit should be reported as `score = f64::INFINITY`, not as an
/// error; errors are for trials that could not train at all.
pub trait Trainer: Send + Sync {
    fn train_and_evaluate(
        &self,
        configuration: &Configuration,
        training: &Dataset,
        validation: &Dataset,
    ) -> Result<TrainingOutcome, TrainerError>;

    /// Name of the score this trainer reports (e.g. "rmse").
    fn objective_name(&self) -> &str {
        "score"
    }
}
