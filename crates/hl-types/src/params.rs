//! Hyperparameter values and configurations.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A concrete parameter value produced by a search strategy.
///
/// Variant order matters for untagged deserialization: integers are tried
/// before floats so that `Int(3)` written as `3` reads back as `Int(3)`, while
/// `Float(3.0)` is written as `3.0` and reads back as a float.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParameterValue {
    Int(i64),
    Float(f64),
    Json(serde_json::Value),
}

impl ParameterValue {
    /// Numeric view of the value (ints widen to `f64`).
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Int(v) => Some(*v as f64),
            Self::Float(v) => Some(*v),
            Self::Json(v) => v.as_f64(),
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int(v) => Some(*v),
            Self::Json(v) => v.as_i64(),
            Self::Float(_) => None,
        }
    }
}

impl std::fmt::Display for ParameterValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Float(v) => write!(f, "{v}"),
            Self::Int(v) => write!(f, "{v}"),
            Self::Json(v) => write!(f, "{v}"),
        }
    }
}

impl From<f64> for ParameterValue {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<i64> for ParameterValue {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<serde_json::Value> for ParameterValue {
    fn from(v: serde_json::Value) -> Self {
        Self::Json(v)
    }
}

/// One sampled point of the search space, keyed by parameter name.
pub type Configuration = BTreeMap<String, ParameterValue>;

/// Short single-line rendering used in log lines and reports.
pub fn describe_configuration(config: &Configuration) -> String {
    config
        .iter()
        .map(|(name, value)| format!("{name}={value}"))
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn int_and_float_stay_distinct_through_json() {
        let mut config = Configuration::new();
        config.insert("epochs".into(), ParameterValue::Int(3));
        config.insert("lr".into(), ParameterValue::Float(3.0));
        config.insert("act".into(), ParameterValue::Json(serde_json::json!("relu")));

        let json = serde_json::to_string(&config).unwrap();
        let back: Configuration = serde_json::from_str(&json).unwrap();
        assert_eq!(back, config);
    }

    #[test]
    fn describe_is_sorted_by_name() {
        let mut config = Configuration::new();
        config.insert("momentum".into(), 0.5.into());
        config.insert("lr".into(), 0.01.into());
        assert_eq!(describe_configuration(&config), "lr=0.01, momentum=0.5");
    }
}
