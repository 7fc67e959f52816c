//! Capture engine commands.

use serde::Deserialize;
use serde_json::Value;

use super::TrialMetadata;
use crate::command::{decode, lenient_count};
use crate::error::AppResult;

/// Requests understood by the capture engine.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum CaptureCommand {
    /// Arm a new capture, optionally labelled with trial metadata.
    StartCapture {
        /// Trial the capture belongs to
        #[serde(default)]
        trial_id: Option<String>,
        /// Cycle number within the trial
        #[serde(default, deserialize_with = "lenient_count")]
        cycle_count: Option<u64>,
    },
    /// Close the current capture and summarize it.
    EndCapture,
}

impl CaptureCommand {
    /// Command names accepted on the wire.
    pub const NAMES: &'static [&'static str] = &["start_capture", "end_capture"];

    /// Decode a raw request.
    pub fn from_request(request: Value) -> AppResult<Self> {
        decode(request, Self::NAMES)
    }
}

/// Metadata is attached when either field is present.
pub(crate) fn metadata_from(
    trial_id: Option<String>,
    cycle_count: Option<u64>,
) -> Option<TrialMetadata> {
    if trial_id.is_none() && cycle_count.is_none() {
        return None;
    }
    Some(TrialMetadata {
        trial_id: trial_id.unwrap_or_default(),
        cycle_count: cycle_count.unwrap_or(0),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::KettleError;
    use serde_json::json;

    #[test]
    fn decodes_start_capture_with_metadata() {
        let cmd = CaptureCommand::from_request(json!({
            "command": "start_capture",
            "trial_id": "trial-123",
            "cycle_count": 5,
        }))
        .unwrap();
        assert_eq!(
            cmd,
            CaptureCommand::StartCapture {
                trial_id: Some("trial-123".into()),
                cycle_count: Some(5),
            }
        );
    }

    #[test]
    fn decodes_bare_commands() {
        assert_eq!(
            CaptureCommand::from_request(json!({"command": "start_capture"})).unwrap(),
            CaptureCommand::StartCapture {
                trial_id: None,
                cycle_count: None
            }
        );
        assert_eq!(
            CaptureCommand::from_request(json!({"command": "end_capture"})).unwrap(),
            CaptureCommand::EndCapture
        );
    }

    #[test]
    fn rejects_wrong_field_types() {
        let err = CaptureCommand::from_request(json!({
            "command": "start_capture",
            "trial_id": 42,
        }))
        .unwrap_err();
        assert!(matches!(err, KettleError::InvalidRequest(_)));
    }

    #[test]
    fn unknown_command() {
        let err = CaptureCommand::from_request(json!({"command": "calibrate"})).unwrap_err();
        assert!(matches!(err, KettleError::UnknownCommand(_)));
    }

    #[test]
    fn metadata_requires_at_least_one_field() {
        assert_eq!(metadata_from(None, None), None);
        assert_eq!(
            metadata_from(None, Some(3)),
            Some(TrialMetadata {
                trial_id: String::new(),
                cycle_count: 3
            })
        );
    }
}
