//! Search space definitions, validation and sampling.

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use hl_types::{Configuration, DomainError, DomainResult, ParameterValue};

/// A single parameter dimension in the search space.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterSpec {
    /// Parameter name as seen by the trainer (e.g. "lr").
    pub name: String,
    #[serde(flatten)]
    pub kind: ParameterKind,
}

/// Describes how a parameter is sampled.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ParameterKind {
    /// Continuous uniform range [low, high].
    Uniform { low: f64, high: f64 },
    /// Log-uniform range (sampled in log-space then exponentiated).
    LogUniform { low: f64, high: f64 },
    /// Integer range [low, high] inclusive.
    IntRange { low: i64, high: i64 },
    /// Categorical choices.
    Categorical { choices: Vec<serde_json::Value> },
}

fn to_json(value: &ParameterValue) -> serde_json::Value {
    match value {
        ParameterValue::Int(v) => serde_json::json!(v),
        ParameterValue::Float(v) => serde_json::json!(v),
        ParameterValue::Json(v) => v.clone(),
    }
}

impl ParameterSpec {
    fn check(&self) -> DomainResult<()> {
        let name = || self.name.clone();
        match &self.kind {
            ParameterKind::Uniform { low, high } | ParameterKind::LogUniform { low, high } => {
                if !low.is_finite() || !high.is_finite() {
                    return Err(DomainError::NonFiniteBound { name: name() });
                }
                if low >= high {
                    return Err(DomainError::InvalidBounds {
                        name: name(),
                        low: *low,
                        high: *high,
                    });
                }
                if !(high - low).is_finite() {
                    return Err(DomainError::RangeTooWide {
                        name: name(),
                        low: *low,
                        high: *high,
                    });
                }
                if matches!(self.kind, ParameterKind::LogUniform { .. }) && *low <= 0.0 {
                    return Err(DomainError::NonPositiveLogBound {
                        name: name(),
                        low: *low,
                    });
                }
            }
            ParameterKind::IntRange { low, high } => {
                if low >= high {
                    return Err(DomainError::InvalidBounds {
                        name: name(),
                        low: *low as f64,
                        high: *high as f64,
                    });
                }
                if high.checked_sub(*low).is_none() {
                    return Err(DomainError::RangeTooWide {
                        name: name(),
                        low: *low as f64,
                        high: *high as f64,
                    });
                }
            }
            ParameterKind::Categorical { choices } => {
                if choices.is_empty() {
                    return Err(DomainError::EmptyChoices { name: name() });
                }
            }
        }
        Ok(())
    }

    /// Draw one value according to the domain kind.
    pub fn sample<R: Rng>(&self, rng: &mut R) -> ParameterValue {
        match &self.kind {
            ParameterKind::Uniform { low, high } => {
                ParameterValue::Float(rng.random_range(*low..=*high))
            }
            ParameterKind::LogUniform { low, high } => {
                let log_val: f64 = rng.random_range(low.ln()..=high.ln());
                // exp(ln(x)) can land an ulp outside the bounds
                ParameterValue::Float(log_val.exp().clamp(*low, *high))
            }
            ParameterKind::IntRange { low, high } => {
                ParameterValue::Int(rng.random_range(*low..=*high))
            }
            ParameterKind::Categorical { choices } => {
                let idx = rng.random_range(0..choices.len());
                ParameterValue::Json(choices[idx].clone())
            }
        }
    }

    /// Check that `value` has the right type and lies inside the domain.
    pub fn validate(&self, value: &ParameterValue) -> DomainResult<()> {
        let mismatch = |expected: &str| DomainError::TypeMismatch {
            name: self.name.clone(),
            expected: expected.to_string(),
            value: value.to_string(),
        };
        let outside = || DomainError::OutOfDomain {
            name: self.name.clone(),
            value: value.to_string(),
        };

        match &self.kind {
            ParameterKind::Uniform { low, high } | ParameterKind::LogUniform { low, high } => {
                let v = match value {
                    ParameterValue::Float(v) => *v,
                    ParameterValue::Int(v) => *v as f64,
                    ParameterValue::Json(_) => return Err(mismatch("float")),
                };
                if !v.is_finite() || v < *low || v > *high {
                    return Err(outside());
                }
            }
            ParameterKind::IntRange { low, high } => {
                let v = match value {
                    ParameterValue::Int(v) => *v,
                    _ => return Err(mismatch("integer")),
                };
                if v < *low || v > *high {
                    return Err(outside());
                }
            }
            ParameterKind::Categorical { choices } => {
                let v = to_json(value);
                if !choices.contains(&v) {
                    return Err(outside());
                }
            }
        }
        Ok(())
    }

    /// Position of a categorical value in the choice list.
    pub fn choice_index(&self, value: &ParameterValue) -> Option<usize> {
        match &self.kind {
            ParameterKind::Categorical { choices } => {
                let v = to_json(value);
                choices.iter().position(|c| *c == v)
            }
            _ => None,
        }
    }

    /// Grid points along this dimension. Continuous dimensions get `steps`
    /// evenly spaced points (log-spaced for log-uniform); integer ranges wider
    /// than `steps` are thinned the same way.
    pub fn grid_values(&self, steps: usize) -> Vec<ParameterValue> {
        let steps = steps.max(2);
        let spaced = |low: f64, high: f64| -> Vec<f64> {
            (0..steps)
                .map(|i| {
                    let t = i as f64 / (steps - 1) as f64;
                    low + t * (high - low)
                })
                .collect()
        };

        match &self.kind {
            ParameterKind::Uniform { low, high } => spaced(*low, *high)
                .into_iter()
                .map(ParameterValue::Float)
                .collect(),
            ParameterKind::LogUniform { low, high } => spaced(low.ln(), high.ln())
                .into_iter()
                .map(|v| ParameterValue::Float(v.exp().clamp(*low, *high)))
                .collect(),
            ParameterKind::IntRange { low, high } => {
                let width = (*high - *low) as u64 + 1;
                if width <= steps as u64 {
                    (*low..=*high).map(ParameterValue::Int).collect()
                } else {
                    let mut values: Vec<i64> = spaced(*low as f64, *high as f64)
                        .into_iter()
                        .map(|v| v.round() as i64)
                        .collect();
                    values.dedup();
                    values.into_iter().map(ParameterValue::Int).collect()
                }
            }
            ParameterKind::Categorical { choices } => choices
                .iter()
                .map(|v| ParameterValue::Json(v.clone()))
                .collect(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct RawSearchSpace {
    parameters: Vec<ParameterSpec>,
}

/// The full search space: an ordered, validated list of parameter specs.
///
/// Immutable once built; the only way in is [`SearchSpace::new`], the
/// builder, or deserialization, and all three validate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawSearchSpace", into = "RawSearchSpace")]
pub struct SearchSpace {
    parameters: Vec<ParameterSpec>,
}

impl TryFrom<RawSearchSpace> for SearchSpace {
    type Error = DomainError;

    fn try_from(raw: RawSearchSpace) -> Result<Self, Self::Error> {
        Self::new(raw.parameters)
    }
}

impl From<SearchSpace> for RawSearchSpace {
    fn from(space: SearchSpace) -> Self {
        Self {
            parameters: space.parameters,
        }
    }
}

impl SearchSpace {
    pub fn new(parameters: Vec<ParameterSpec>) -> DomainResult<Self> {
        if parameters.is_empty() {
            return Err(DomainError::EmptySpace);
        }
        let mut seen = HashSet::new();
        for param in &parameters {
            if !seen.insert(param.name.as_str()) {
                return Err(DomainError::DuplicateParameter {
                    name: param.name.clone(),
                });
            }
            param.check()?;
        }
        Ok(Self { parameters })
    }

    pub fn builder() -> SearchSpaceBuilder {
        SearchSpaceBuilder::default()
    }

    /// `lr` log-uniform over [1e-5, 1e-1] and `momentum` uniform over [0, 1].
    pub fn learning_rate_momentum() -> Self {
        Self {
            parameters: vec![
                ParameterSpec {
                    name: "lr".to_string(),
                    kind: ParameterKind::LogUniform {
                        low: 1e-5,
                        high: 1e-1,
                    },
                },
                ParameterSpec {
                    name: "momentum".to_string(),
                    kind: ParameterKind::Uniform {
                        low: 0.0,
                        high: 1.0,
                    },
                },
            ],
        }
    }

    pub fn parameters(&self) -> &[ParameterSpec] {
        &self.parameters
    }

    pub fn get(&self, name: &str) -> Option<&ParameterSpec> {
        self.parameters.iter().find(|p| p.name == name)
    }

    pub fn len(&self) -> usize {
        self.parameters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.parameters.is_empty()
    }

    /// Draw one configuration, sampling every parameter independently.
    pub fn sample<R: Rng>(&self, rng: &mut R) -> Configuration {
        self.parameters
            .iter()
            .map(|p| (p.name.clone(), p.sample(rng)))
            .collect()
    }

    /// Reject unknown keys, missing keys and out-of-domain values.
    pub fn validate(&self, config: &Configuration) -> DomainResult<()> {
        if let Some(unknown) = config.keys().find(|k| self.get(k).is_none()) {
            return Err(DomainError::UnknownParameter {
                name: unknown.clone(),
            });
        }
        for param in &self.parameters {
            let value = config
                .get(&param.name)
                .ok_or_else(|| DomainError::MissingParameter {
                    name: param.name.clone(),
                })?;
            param.validate(value)?;
        }
        Ok(())
    }

    /// Total number of grid points at `steps` points per continuous
    /// dimension. `None` on overflow.
    pub fn grid_size(&self, steps: usize) -> Option<usize> {
        let mut total: usize = 1;
        for param in &self.parameters {
            total = total.checked_mul(param.grid_values(steps).len())?;
        }
        Some(total)
    }
}

/// Fluent constructor; validation happens in [`SearchSpaceBuilder::build`].
#[derive(Debug, Clone, Default)]
pub struct SearchSpaceBuilder {
    parameters: Vec<ParameterSpec>,
}

impl SearchSpaceBuilder {
    fn push(mut self, name: impl Into<String>, kind: ParameterKind) -> Self {
        self.parameters.push(ParameterSpec {
            name: name.into(),
            kind,
        });
        self
    }

    pub fn add_uniform(self, name: impl Into<String>, low: f64, high: f64) -> Self {
        self.push(name, ParameterKind::Uniform { low, high })
    }

    pub fn add_log_uniform(self, name: impl Into<String>, low: f64, high: f64) -> Self {
        self.push(name, ParameterKind::LogUniform { low, high })
    }

    pub fn add_int(self, name: impl Into<String>, low: i64, high: i64) -> Self {
        self.push(name, ParameterKind::IntRange { low, high })
    }

    pub fn add_categorical(self, name: impl Into<String>, choices: Vec<serde_json::Value>) -> Self {
        self.push(name, ParameterKind::Categorical { choices })
    }

    pub fn build(self) -> DomainResult<SearchSpace> {
        SearchSpace::new(self.parameters)
    }
}
