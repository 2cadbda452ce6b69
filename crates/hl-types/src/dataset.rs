//! Tabular datasets handed to trainers.
//!
//! The orchestration core treats these as opaque and immutable: it passes
//! references through to the trainer and never reshapes or resplits them.

use serde::{Deserialize, Serialize};

use crate::errors::DataError;

/// Dense feature matrix plus a regression target.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dataset {
    feature_names: Vec<String>,
    features: Vec<Vec<f64>>,
    targets: Vec<f64>,
}

impl Dataset {
    /// Build a dataset, checking that every row has one value per feature
    /// name and that there is one target per row.
    pub fn new(
        feature_names: Vec<String>,
        features: Vec<Vec<f64>>,
        targets: Vec<f64>,
    ) -> Result<Self, DataError> {
        if features.len() != targets.len() {
            return Err(DataError::Shape {
                message: format!(
                    "{} feature rows but {} targets",
                    features.len(),
                    targets.len()
                ),
            });
        }
        if let Some((i, row)) = features
            .iter()
            .enumerate()
            .find(|(_, row)| row.len() != feature_names.len())
        {
            return Err(DataError::Shape {
                message: format!(
                    "row {i} has {} values, expected {}",
                    row.len(),
                    feature_names.len()
                ),
            });
        }
        Ok(Self {
            feature_names,
            features,
            targets,
        })
    }

    pub fn feature_names(&self) -> &[String] {
        &self.feature_names
    }

    pub fn features(&self) -> &[Vec<f64>] {
        &self.features
    }

    pub fn targets(&self) -> &[f64] {
        &self.targets
    }

    pub fn len(&self) -> usize {
        self.targets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }

    pub fn n_features(&self) -> usize {
        self.feature_names.len()
    }

    /// New dataset holding the given rows, in the given order.
    pub fn select(&self, indices: &[usize]) -> Result<Self, DataError> {
        let mut features = Vec::with_capacity(indices.len());
        let mut targets = Vec::with_capacity(indices.len());
        for &i in indices {
            let row = self.features.get(i).ok_or_else(|| DataError::Shape {
                message: format!("row index {i} out of range ({} rows)", self.len()),
            })?;
            features.push(row.clone());
            targets.push(self.targets[i]);
        }
        Ok(Self {
            feature_names: self.feature_names.clone(),
            features,
            targets,
        })
    }
}

/// Pre-split data supplied by the dataset collaborator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasetSplits {
    pub training: Dataset,
    pub validation: Dataset,
    pub holdout: Dataset,
}
