//! CSV loading and seeded train/validation/holdout splitting.

use csv::ReaderBuilder;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use std::path::Path;

use hl_types::{DataError, Dataset, DatasetSplits};

/// How to read a delimited file into a [`Dataset`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CsvOptions {
    /// Column holding the regression target. Every other column is a feature.
    pub target: String,
    pub delimiter: u8,
}

impl Default for CsvOptions {
    fn default() -> Self {
        Self {
            target: "quality".to_string(),
            delimiter: b';',
        }
    }
}

impl CsvOptions {
    pub fn new(target: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            ..Self::default()
        }
    }

    pub fn with_delimiter(mut self, delimiter: u8) -> Self {
        self.delimiter = delimiter;
        self
    }
}

/// Load a headed, delimited file of numeric columns.
///
/// Rows with a non-numeric cell or the wrong number of columns are skipped
/// with a warning; a file with no
/// usable rows is an error.
pub fn load_csv<P: AsRef<Path>>(path: P, options: &CsvOptions) -> Result<Dataset, DataError> {
    let path = path.as_ref();
    tracing::info!("Loading CSV data from: {}", path.display());

    let mut rdr = ReaderBuilder::new()
        .delimiter(options.delimiter)
        .has_headers(true)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_path(path)
        .map_err(|e| DataError::Load {
            message: format!("Failed to open CSV file {}: {}", path.display(), e),
        })?;

    let headers = rdr
        .headers()
        .map_err(|e| DataError::Load {
            message: format!("Failed to read CSV headers: {}", e),
        })?
        .clone();
    tracing::debug!("CSV headers: {:?}", headers);

    let target_idx = headers
        .iter()
        .position(|h| h.trim_matches('"') == options.target)
        .ok_or_else(|| DataError::MissingColumn {
            column: options.target.clone(),
        })?;
    let feature_names: Vec<String> = headers
        .iter()
        .enumerate()
        .filter(|(i, _)| *i != target_idx)
        .map(|(_, h)| h.trim_matches('"').to_string())
        .collect();

    let mut features = Vec::new();
    let mut targets = Vec::new();
    for (line_num, result) in rdr.records().enumerate() {
        let record = result.map_err(|e| DataError::Load {
            message: format!("Failed to read CSV record at line {}: {}", line_num + 2, e),
        })?;

        let parsed: Result<Vec<f64>, _> = record.iter().map(|cell| cell.parse::<f64>()).collect();
        let mut values = match parsed {
            Ok(values) if values.len() == headers.len() => values,
            Ok(values) => {
                tracing::warn!(
                    "Skipping record at line {}: {} columns, expected {}",
                    line_num + 2,
                    values.len(),
                    headers.len()
                );
                continue;
            }
            Err(e) => {
                tracing::warn!("Skipping invalid record at line {}: {}", line_num + 2, e);
                continue;
            }
        };
        targets.push(values.remove(target_idx));
        features.push(values);
    }

    if targets.is_empty() {
        return Err(DataError::Empty);
    }
    tracing::info!(
        "Loaded {} rows with {} features from CSV file",
        targets.len(),
        feature_names.len()
    );
    Dataset::new(feature_names, features, targets)
}

/// Fractions of rows for training and validation; holdout gets the rest.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SplitRatios {
    pub training: f64,
    pub validation: f64,
}

impl Default for SplitRatios {
    fn default() -> Self {
        Self {
            training: 0.6,
            validation: 0.2,
        }
    }
}

/// Shuffle rows with a seeded RNG and cut them into three non-empty splits.
pub fn split_dataset(
    dataset: &Dataset,
    ratios: SplitRatios,
    seed: u64,
) -> Result<DatasetSplits, DataError> {
    let n = dataset.len();
    let valid_ratios = ratios.training > 0.0
        && ratios.validation > 0.0
        && ratios.training + ratios.validation < 1.0;
    if !valid_ratios {
        return Err(DataError::Shape {
            message: format!(
                "split ratios must be positive and sum below 1 (got {} and {})",
                ratios.training, ratios.validation
            ),
        });
    }
    if n < 3 {
        return Err(DataError::Shape {
            message: format!("need at least 3 rows to split, got {n}"),
        });
    }

    let mut indices: Vec<usize> = (0..n).collect();
    indices.shuffle(&mut ChaCha8Rng::seed_from_u64(seed));

    let n_train = ((n as f64 * ratios.training).round() as usize).clamp(1, n - 2);
    let n_val = ((n as f64 * ratios.validation).round() as usize).clamp(1, n - n_train - 1);

    Ok(DatasetSplits {
        training: dataset.select(&indices[..n_train])?,
        validation: dataset.select(&indices[n_train..n_train + n_val])?,
        holdout: dataset.select(&indices[n_train + n_val..])?,
    })
}
