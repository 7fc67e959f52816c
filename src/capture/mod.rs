//! Force capture.
//!
//! A [`CaptureEngine`] samples a force source at a fixed rate and, on command,
//! records the contact event into a bounded [`SampleBuffer`]:
//!
//! ```text
//!          start_capture            force > threshold
//!   Idle ───────────────► Waiting ───────────────────► Capturing
//!    ▲                       │                             │
//!    └──────── end_capture / capture_timeout ──────────────┘
//! ```
//!
//! The orchestrator drives captures through the [`ForceCapture`] trait; external
//! callers use the JSON command surface ([`crate::hardware::Commandable`]).

pub mod buffer;
pub mod command;
pub mod engine;

pub use buffer::SampleBuffer;
pub use command::CaptureCommand;
pub use engine::{CaptureEngine, CaptureSettings, MAX_BUFFER_SIZE, MIN_SAMPLE_RATE_HZ};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::AppResult;

/// Capture state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CaptureState {
    /// No capture armed; readings are discarded
    #[default]
    Idle,
    /// Armed; waiting for the first reading above the zero threshold
    Waiting,
    /// Contact detected; readings are buffered
    Capturing,
}

impl std::fmt::Display for CaptureState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CaptureState::Idle => write!(f, "idle"),
            CaptureState::Waiting => write!(f, "waiting"),
            CaptureState::Capturing => write!(f, "capturing"),
        }
    }
}

/// Trial labels attached to a capture and echoed back when it ends.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TrialMetadata {
    /// Trial identifier
    pub trial_id: String,
    /// Cycle number within the trial
    pub cycle_count: u64,
}

/// Result of `end_capture`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaptureSummary {
    /// Trial id from the start request, `""` for standalone captures
    pub trial_id: String,
    /// Cycle number from the start request, `0` for standalone captures
    pub cycle_count: u64,
    /// Samples buffered during the capture
    pub sample_count: usize,
    /// Peak force, absent when nothing was buffered
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_force: Option<f64>,
}

/// Telemetry snapshot of a capture engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaptureReadings {
    /// Trial id of the open capture, `""` when none
    pub trial_id: String,
    /// Cycle number of the open capture, `0` when none
    pub cycle_count: u64,
    /// True while a capture is open
    pub should_sync: bool,
    /// Buffered samples (retained after `end_capture` until the next start)
    pub samples: Vec<f64>,
    /// Current state
    pub capture_state: CaptureState,
    /// Peak buffered force, absent when the buffer is empty
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_force: Option<f64>,
}

/// Capture operations the trial orchestrator brackets each cycle with.
#[async_trait]
pub trait ForceCapture: Send + Sync {
    /// Arm a capture. Fails with `AlreadyCapturing` unless idle.
    async fn start_capture(&self, metadata: Option<TrialMetadata>) -> AppResult<()>;

    /// Close the open capture. Fails with `NoActiveCapture` when idle.
    async fn end_capture(&self) -> AppResult<CaptureSummary>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn state_serializes_lowercase() {
        assert_eq!(
            serde_json::to_value(CaptureState::Capturing).unwrap(),
            json!("capturing")
        );
        assert_eq!(CaptureState::Waiting.to_string(), "waiting");
    }

    #[test]
    fn summary_omits_absent_max_force() {
        let summary = CaptureSummary {
            trial_id: String::new(),
            cycle_count: 0,
            sample_count: 0,
            max_force: None,
        };
        let value = serde_json::to_value(summary).unwrap();
        assert!(value.get("max_force").is_none());
        assert_eq!(value["sample_count"], json!(0));
    }
}
