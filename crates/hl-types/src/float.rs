//! Serde adapter for `f64` fields that may hold non-finite values.
//!
//! JSON has no representation for infinities, and `serde_json` silently writes
//! them as `null`. Failed trials carry a score of `+inf`, so scores and metric
//! values use `#[serde(with = "hl_types::float")]` to encode non-finite values
//! as the strings `"inf"`, `"-inf"` and `"nan"`.

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serializer};

pub fn serialize<S: Serializer>(value: &f64, serializer: S) -> Result<S::Ok, S::Error> {
    if value.is_finite() {
        serializer.serialize_f64(*value)
    } else if value.is_nan() {
        serializer.serialize_str("nan")
    } else if value.is_sign_positive() {
        serializer.serialize_str("inf")
    } else {
        serializer.serialize_str("-inf")
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum Repr {
    Number(f64),
    Text(String),
}

pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f64, D::Error> {
    match Repr::deserialize(deserializer)? {
        Repr::Number(v) => Ok(v),
        Repr::Text(s) => match s.as_str() {
            "inf" | "+inf" => Ok(f64::INFINITY),
            "-inf" => Ok(f64::NEG_INFINITY),
            "nan" => Ok(f64::NAN),
            other => Err(D::Error::custom(format!("invalid float: {other}"))),
        },
    }
}

#[cfg(test)]
mod tests {
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Serialize, Deserialize)]
    struct Score {
        #[serde(with = "crate::float")]
        value: f64,
    }

    #[test]
    fn infinity_survives_json() {
        let json = serde_json::to_string(&Score {
            value: f64::INFINITY,
        })
        .unwrap();
        assert_eq!(json, r#"{"value":"inf"}"#);

        let back: Score = serde_json::from_str(&json).unwrap();
        assert!(back.value.is_infinite() && back.value > 0.0);
    }

    #[test]
    fn finite_values_stay_numbers() {
        let json = serde_json::to_string(&Score { value: 0.25 }).unwrap();
        assert_eq!(json, r#"{"value":0.25}"#);
    }

    #[test]
    fn rejects_garbage_strings() {
        assert!(serde_json::from_str::<Score>(r#"{"value":"lots"}"#).is_err());
    }
}
