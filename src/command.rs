//! Command boundary shared by the capture engine and the trial orchestrator.
//!
//! Requests arrive as `{command: string, ...params}`. They are decoded exactly
//! once into a closed enum; nothing past this point looks at the raw map.

use serde::de::{DeserializeOwned, Deserializer};
use serde::Deserialize;
use serde_json::Value;

use crate::error::{AppResult, KettleError};

/// Decode `request` into `T`, an enum internally tagged on `command`.
///
/// `known` lists the command names `T` accepts so an unrecognized name is
/// reported as [`KettleError::UnknownCommand`] rather than a decode failure.
pub fn decode<T: DeserializeOwned>(request: Value, known: &[&str]) -> AppResult<T> {
    let name = match request.get("command") {
        Some(Value::String(name)) => name.clone(),
        Some(other) => {
            return Err(KettleError::InvalidRequest(format!(
                "'command' must be a string, got {other}"
            )))
        }
        None => {
            return Err(KettleError::InvalidRequest(
                "missing 'command' field".to_string(),
            ))
        }
    };

    if !known.contains(&name.as_str()) {
        return Err(KettleError::UnknownCommand(name));
    }

    serde_json::from_value(request)
        .map_err(|e| KettleError::InvalidRequest(format!("{name}: {e}")))
}

/// Accept a non-negative integral count encoded either as an integer or as a
/// float such as `5.0`, the form untyped JSON clients usually produce.
pub(crate) fn lenient_count<'de, D>(deserializer: D) -> Result<Option<u64>, D::Error>
where
    D: Deserializer<'de>,
{
    let Some(value) = Option::<f64>::deserialize(deserializer)? else {
        return Ok(None);
    };
    if !value.is_finite() || value < 0.0 || value.fract() != 0.0 || value > u64::MAX as f64 {
        return Err(serde::de::Error::custom(format!(
            "expected a non-negative integer, got {value}"
        )));
    }
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    Ok(Some(value as u64))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[derive(Debug, Deserialize, PartialEq)]
    #[serde(tag = "command", rename_all = "snake_case")]
    enum Probe {
        Ping,
        Count {
            #[serde(default, deserialize_with = "lenient_count")]
            n: Option<u64>,
        },
    }

    const NAMES: &[&str] = &["ping", "count"];

    #[test]
    fn missing_command_is_invalid() {
        let err = decode::<Probe>(json!({"n": 1}), NAMES).unwrap_err();
        assert!(matches!(err, KettleError::InvalidRequest(_)));
    }

    #[test]
    fn non_string_command_is_invalid() {
        let err = decode::<Probe>(json!({"command": 7}), NAMES).unwrap_err();
        assert!(matches!(err, KettleError::InvalidRequest(_)));
    }

    #[test]
    fn unknown_command_is_reported_by_name() {
        let err = decode::<Probe>(json!({"command": "dance"}), NAMES).unwrap_err();
        assert!(matches!(err, KettleError::UnknownCommand(ref n) if n == "dance"));
    }

    #[test]
    fn counts_accept_integral_floats() {
        assert_eq!(
            decode::<Probe>(json!({"command": "count", "n": 5.0}), NAMES).unwrap(),
            Probe::Count { n: Some(5) }
        );
        assert_eq!(
            decode::<Probe>(json!({"command": "count"}), NAMES).unwrap(),
            Probe::Count { n: None }
        );
        assert!(decode::<Probe>(json!({"command": "count", "n": -1}), NAMES).is_err());
        assert!(decode::<Probe>(json!({"command": "count", "n": 1.5}), NAMES).is_err());
    }

    #[test]
    fn extra_fields_are_ignored() {
        assert_eq!(
            decode::<Probe>(json!({"command": "ping", "verbose": true}), NAMES).unwrap(),
            Probe::Ping
        );
    }
}
