//! Reference trainer: a one-hidden-layer ReLU regressor fit with mini-batch
//! SGD and momentum.

use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};

use hl_types::{
    Configuration, CurvePoint, Dataset, ModelArtifact, ParameterValue, Trainer, TrainerError,
    TrainingOutcome,
};

const DEFAULT_HIDDEN_UNITS: i64 = 64;
const DEFAULT_EPOCHS: i64 = 10;
const DEFAULT_BATCH_SIZE: i64 = 64;

/// Hyperparameters read from a configuration.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MlpParams {
    pub lr: f64,
    pub momentum: f64,
    pub hidden_units: usize,
    pub epochs: usize,
    pub batch_size: usize,
}

fn invalid(parameter: &str, message: impl Into<String>) -> TrainerError {
    TrainerError::InvalidConfiguration {
        parameter: parameter.to_string(),
        message: message.into(),
    }
}

fn required_float(config: &Configuration, name: &str) -> Result<f64, TrainerError> {
    let value = config
        .get(name)
        .ok_or_else(|| invalid(name, "required"))?;
    value
        .as_f64()
        .filter(|v| v.is_finite())
        .ok_or_else(|| invalid(name, format!("expected a finite number, got {value}")))
}

fn optional_count(config: &Configuration, name: &str, default: i64) -> Result<usize, TrainerError> {
    let value = match config.get(name) {
        None => default,
        Some(ParameterValue::Int(v)) => *v,
        Some(other) => {
            return Err(invalid(name, format!("expected an integer, got {other}")));
        }
    };
    if value < 1 {
        return Err(invalid(name, format!("must be at least 1, got {value}")));
    }
    Ok(value as usize)
}

impl MlpParams {
    pub fn from_configuration(config: &Configuration) -> Result<Self, TrainerError> {
        let lr = required_float(config, "lr")?;
        if lr <= 0.0 {
            return Err(invalid("lr", format!("must be positive, got {lr}")));
        }
        let momentum = required_float(config, "momentum")?;
        if !(0.0..=1.0).contains(&momentum) {
            return Err(invalid("momentum", format!("must lie in [0, 1], got {momentum}")));
        }
        Ok(Self {
            lr,
            momentum,
            hidden_units: optional_count(config, "hidden_units", DEFAULT_HIDDEN_UNITS)?,
            epochs: optional_count(config, "epochs", DEFAULT_EPOCHS)?,
            batch_size: optional_count(config, "batch_size", DEFAULT_BATCH_SIZE)?,
        })
    }
}

/// Per-column mean and standard deviation from the training split.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Standardizer {
    pub means: Vec<f64>,
    pub stds: Vec<f64>,
}

impl Standardizer {
    fn fit(rows: &[Vec<f64>], width: usize) -> Self {
        let n = rows.len().max(1) as f64;
        let mut means = vec![0.0; width];
        for row in rows {
            for (m, x) in means.iter_mut().zip(row) {
                *m += x / n;
            }
        }
        let mut stds = vec![0.0; width];
        for row in rows {
            for ((s, x), m) in stds.iter_mut().zip(row).zip(&means) {
                *s += (x - m).powi(2) / n;
            }
        }
        for s in &mut stds {
            *s = s.sqrt();
            if *s < 1e-12 {
                *s = 1.0;
            }
        }
        Self { means, stds }
    }

    fn apply(&self, row: &[f64]) -> Vec<f64> {
        row.iter()
            .zip(self.means.iter().zip(&self.stds))
            .map(|(x, (m, s))| (x - m) / s)
            .collect()
    }
}

/// Fitted network. Serialized as the trial artifact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MlpModel {
    pub feature_names: Vec<String>,
    pub inputs: Standardizer,
    pub target_mean: f64,
    pub target_std: f64,
    pub hidden_units: usize,
    /// Row-major `hidden_units x n_features`.
    pub w1: Vec<f64>,
    pub b1: Vec<f64>,
    pub w2: Vec<f64>,
    pub b2: f64,
}

impl MlpModel {
    fn init(training: &Dataset, hidden_units: usize, rng: &mut ChaCha8Rng) -> Self {
        let n_inputs = training.n_features();
        let targets = training.targets();
        let n = targets.len().max(1) as f64;
        let target_mean = targets.iter().sum::<f64>() / n;
        let target_var = targets.iter().map(|t| (t - target_mean).powi(2)).sum::<f64>() / n;
        let target_std = if target_var.sqrt() < 1e-12 { 1.0 } else { target_var.sqrt() };

        // He initialisation for the ReLU layer
        let scale1 = (2.0 / n_inputs.max(1) as f64).sqrt();
        let scale2 = (1.0 / hidden_units as f64).sqrt();
        Self {
            feature_names: training.feature_names().to_vec(),
            inputs: Standardizer::fit(training.features(), n_inputs),
            target_mean,
            target_std,
            hidden_units,
            w1: (0..hidden_units * n_inputs)
                .map(|_| rng.random_range(-1.0..1.0) * scale1)
                .collect(),
            b1: vec![0.0; hidden_units],
            w2: (0..hidden_units)
                .map(|_| rng.random_range(-1.0..1.0) * scale2)
                .collect(),
            b2: 0.0,
        }
    }

    fn n_inputs(&self) -> usize {
        self.feature_names.len()
    }

    /// Hidden pre-activations and the standardized output.
    fn forward(&self, x: &[f64], hidden: &mut [f64]) -> f64 {
        let n = self.n_inputs();
        let mut out = self.b2;
        for (j, h) in hidden.iter_mut().enumerate() {
            let row = &self.w1[j * n..(j + 1) * n];
            *h = self.b1[j] + row.iter().zip(x).map(|(w, xi)| w * xi).sum::<f64>();
            out += self.w2[j] * h.max(0.0);
        }
        out
    }

    /// Prediction in target units for one raw (unstandardized) feature row.
    pub fn predict(&self, features: &[f64]) -> f64 {
        let x = self.inputs.apply(features);
        let mut hidden = vec![0.0; self.hidden_units];
        self.forward(&x, &mut hidden) * self.target_std + self.target_mean
    }

    /// Root mean squared error over a dataset, in target units.
    pub fn rmse(&self, dataset: &Dataset) -> f64 {
        if dataset.is_empty() {
            return f64::INFINITY;
        }
        let sse: f64 = dataset
            .features()
            .iter()
            .zip(dataset.targets())
            .map(|(row, t)| (self.predict(row) - t).powi(2))
            .sum();
        (sse / dataset.len() as f64).sqrt()
    }

    pub fn to_artifact(&self) -> Result<ModelArtifact, TrainerError> {
        serde_json::to_vec(self)
            .map(ModelArtifact::json)
            .map_err(|e| TrainerError::Failed {
                message: format!("failed to serialize model: {e}"),
            })
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, TrainerError> {
        serde_json::from_slice(bytes).map_err(|e| TrainerError::Failed {
            message: format!("failed to read model: {e}"),
        })
    }
}

/// Momentum buffers shaped like the model parameters.
struct Gradients {
    w1: Vec<f64>,
    b1: Vec<f64>,
    w2: Vec<f64>,
    b2: f64,
}

impl Gradients {
    fn zeros(model: &MlpModel) -> Self {
        Self {
            w1: vec![0.0; model.w1.len()],
            b1: vec![0.0; model.b1.len()],
            w2: vec![0.0; model.w2.len()],
            b2: 0.0,
        }
    }
}

/// Stateless reference trainer. Each call builds a fresh model seeded from
/// `seed`, so the same configuration always yields the same fit.
#[derive(Debug, Clone, Default)]
pub struct MlpTrainer {
    seed: u64,
}

impl MlpTrainer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Fit a model; returns it with the per-epoch curve. Stops early on
    /// divergence.
    pub fn fit(
        &self,
        params: &MlpParams,
        training: &Dataset,
        validation: &Dataset,
    ) -> (MlpModel, Vec<CurvePoint>, bool) {
        let mut rng = ChaCha8Rng::seed_from_u64(self.seed);
        let mut model = MlpModel::init(training, params.hidden_units, &mut rng);
        let mut velocity = Gradients::zeros(&model);
        let n_inputs = model.n_inputs();

        let xs: Vec<Vec<f64>> = training
            .features()
            .iter()
            .map(|row| model.inputs.apply(row))
            .collect();
        let ys: Vec<f64> = training
            .targets()
            .iter()
            .map(|t| (t - model.target_mean) / model.target_std)
            .collect();

        let mut order: Vec<usize> = (0..xs.len()).collect();
        let mut hidden = vec![0.0; params.hidden_units];
        let mut curve = Vec::with_capacity(params.epochs * 2);

        for epoch in 0..params.epochs {
            order.shuffle(&mut rng);
            let mut epoch_loss = 0.0;

            for batch in order.chunks(params.batch_size) {
                let mut grad = Gradients::zeros(&model);
                for &i in batch {
                    let x = &xs[i];
                    let err = model.forward(x, &mut hidden) - ys[i];
                    epoch_loss += 0.5 * err * err;

                    grad.b2 += err;
                    for (j, z) in hidden.iter().enumerate() {
                        if *z <= 0.0 {
                            continue;
                        }
                        grad.w2[j] += err * z;
                        let delta = err * model.w2[j];
                        grad.b1[j] += delta;
                        for (g, xi) in grad.w1[j * n_inputs..(j + 1) * n_inputs].iter_mut().zip(x) {
                            *g += delta * xi;
                        }
                    }
                }

                let scale = 1.0 / batch.len() as f64;
                let step = |w: &mut f64, v: &mut f64, g: f64| {
                    *v = params.momentum * *v - params.lr * g * scale;
                    *w += *v;
                };
                for ((w, v), g) in model.w1.iter_mut().zip(&mut velocity.w1).zip(&grad.w1) {
                    step(w, v, *g);
                }
                for ((w, v), g) in model.b1.iter_mut().zip(&mut velocity.b1).zip(&grad.b1) {
                    step(w, v, *g);
                }
                for ((w, v), g) in model.w2.iter_mut().zip(&mut velocity.w2).zip(&grad.w2) {
                    step(w, v, *g);
                }
                step(&mut model.b2, &mut velocity.b2, grad.b2);
            }

            let train_loss = epoch_loss / xs.len().max(1) as f64;
            let val_rmse = model.rmse(validation);
            curve.push(CurvePoint {
                name: "train_loss".to_string(),
                value: train_loss,
                step: epoch as u64,
            });
            curve.push(CurvePoint {
                name: "val_rmse".to_string(),
                value: val_rmse,
                step: epoch as u64,
            });

            if !train_loss.is_finite() || !val_rmse.is_finite() {
                tracing::debug!("Training diverged at epoch {}", epoch);
                return (model, curve, true);
            }
        }

        (model, curve, false)
    }
}

impl Trainer for MlpTrainer {
    fn train_and_evaluate(
        &self,
        configuration: &Configuration,
        training: &Dataset,
        validation: &Dataset,
    ) -> Result<TrainingOutcome, TrainerError> {
        let params = MlpParams::from_configuration(configuration)?;
        if training.is_empty() || validation.is_empty() {
            return Err(TrainerError::Data {
                message: "training and validation splits must be non-empty".to_string(),
            });
        }
        if training.n_features() != validation.n_features() {
            return Err(TrainerError::Data {
                message: format!(
                    "training has {} features, validation has {}",
                    training.n_features(),
                    validation.n_features()
                ),
            });
        }

        let (model, curve, diverged) = self.fit(&params, training, validation);
        let rmse = model.rmse(validation);
        let score = if diverged || !rmse.is_finite() {
            f64::INFINITY
        } else {
            rmse
        };

        Ok(TrainingOutcome {
            score,
            artifact: model.to_artifact()?,
            curve,
        })
    }

    fn objective_name(&self) -> &str {
        "rmse"
    }
}
