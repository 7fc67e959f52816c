//! Collaborator Capabilities
//!
//! One narrow trait per hardware or service role the rig talks to. The core
//! never sees a concrete driver: the arm, the two position switches, the force
//! source, the camera and the upload client are injected as trait objects.
//!
//! - An arm implements: `Actuator`
//! - A saved-pose switch implements: `PositionSwitch`
//! - A load cell or simulated sensor implements: `ForceReader`
//! - A generic scalar device implements: `Readable` (wrapped by `LoadCellReader`)
//! - A camera implements: `Camera`
//! - A dataset upload client implements: `UploadClient`
//!
//! # Design Philosophy
//!
//! Each capability trait:
//! - Is async (uses #[async_trait])
//! - Is thread-safe (requires Send + Sync)
//! - Uses anyhow::Result for errors
//! - Focuses on ONE thing
//!
//! # Example
//!
//! ```rust,ignore
//! async fn wait_until_still<A: Actuator + ?Sized>(arm: &A) -> Result<()> {
//!     while arm.is_moving().await? {
//!         tokio::time::sleep(Duration::from_millis(50)).await;
//!     }
//!     Ok(())
//! }
//! ```

use anyhow::Result;
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::AppResult;

/// Switch position that drives the arm to the switch's saved pose.
pub const ACTIVE_POSITION: u32 = 2;

/// Extra, driver-specific options passed along with a switch command.
pub type SwitchOptions = serde_json::Map<String, serde_json::Value>;

// =============================================================================
// Motion
// =============================================================================

/// Capability: Motion Status
///
/// The robot arm is only ever observed, never commanded directly; motion is
/// triggered through [`PositionSwitch`]es bound to saved poses.
#[async_trait]
pub trait Actuator: Send + Sync {
    /// Whether the arm is currently in motion.
    async fn is_moving(&self) -> Result<bool>;
}

/// Capability: Saved-Pose Switch
///
/// Multi-position switch whose active position sends the arm to a saved pose.
///
/// # Contract
/// - `set_position` initiates motion and may return before it completes
/// - Callers poll [`Actuator::is_moving`] to know when the pose is reached
#[async_trait]
pub trait PositionSwitch: Send + Sync {
    /// Move the switch to `position`.
    async fn set_position(&self, position: u32, options: Option<SwitchOptions>) -> Result<()>;
}

// =============================================================================
// Force Sensing
// =============================================================================

/// Capability: Force Source
///
/// Produces one force magnitude per call. Sources may be slow or fail
/// transiently; the capture engine absorbs both.
#[async_trait]
pub trait ForceReader: Send + Sync {
    /// Read the current force magnitude.
    async fn read_force(&self) -> Result<f64>;

    /// Notified when a capture starts (`true`) or ends (`false`).
    ///
    /// Real sensors ignore this. Simulated sources use it to produce a
    /// contact event while a capture is open. Called while the capture engine
    /// holds its state lock, so it must return promptly and must not call
    /// back into the engine.
    fn capture_hint(&self, _active: bool) {}
}

/// Capability: Scalar Readout
///
/// Devices that produce single scalar values (ADC channels, load-cell
/// amplifiers, gauges). Units are device-specific.
#[async_trait]
pub trait Readable: Send + Sync {
    /// Perform one measurement.
    async fn read(&self) -> Result<f64>;
}

// =============================================================================
// Vision
// =============================================================================

/// Image MIME types understood by the upload path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MimeType {
    /// `image/jpeg`
    #[serde(rename = "image/jpeg")]
    Jpeg,
    /// `image/png`
    #[serde(rename = "image/png")]
    Png,
}

impl MimeType {
    /// The MIME string.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            MimeType::Jpeg => "image/jpeg",
            MimeType::Png => "image/png",
        }
    }

    /// Identify the format from the leading bytes of an encoded image.
    #[must_use]
    pub fn sniff(data: &[u8]) -> Option<Self> {
        if data.starts_with(&[0xFF, 0xD8, 0xFF]) {
            Some(MimeType::Jpeg)
        } else if data.starts_with(&[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A]) {
            Some(MimeType::Png)
        } else {
            None
        }
    }
}

impl std::fmt::Display for MimeType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Metadata returned by a camera alongside the encoded image.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageMetadata {
    /// MIME type the camera reports for the payload
    pub mime_type: String,
    /// When the frame was captured
    pub captured_at: DateTime<Utc>,
}

/// Capability: Still Image Capture
#[async_trait]
pub trait Camera: Send + Sync {
    /// Capture one encoded image, requesting `mime_type` from the driver.
    async fn capture_image(&self, mime_type: &str) -> Result<(Bytes, ImageMetadata)>;
}

/// Options forwarded to the dataset upload client.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UploadOptions {
    /// Optional file name hint for the stored image
    pub file_name: Option<String>,
}

/// Capability: Dataset Upload
#[async_trait]
pub trait UploadClient: Send + Sync {
    /// Upload an image to the given datasets and return the stored file id.
    async fn upload_image(
        &self,
        part_id: &str,
        image: Bytes,
        dataset_ids: &[String],
        tags: &[String],
        mime_type: MimeType,
        options: &UploadOptions,
    ) -> Result<String>;
}

// =============================================================================
// Command Surface
// =============================================================================

/// Generic command surface shared by the capture engine and the orchestrator.
///
/// # Contract
/// - `do_command()` takes `{command: string, ...params}` and returns a JSON object
/// - `readings()` is non-mutating and safe to call from any number of callers
#[async_trait]
pub trait Commandable: Send + Sync {
    /// Decode and execute one request.
    async fn do_command(&self, request: serde_json::Value) -> AppResult<serde_json::Value>;

    /// Snapshot of the component's telemetry.
    fn readings(&self) -> serde_json::Value;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sniff_recognizes_jpeg_and_png() {
        assert_eq!(MimeType::sniff(&[0xFF, 0xD8, 0xFF, 0xE0]), Some(MimeType::Jpeg));
        assert_eq!(
            MimeType::sniff(b"\x89PNG\r\n\x1a\n\0\0"),
            Some(MimeType::Png)
        );
        assert_eq!(MimeType::sniff(b"GIF89a"), None);
        assert_eq!(MimeType::sniff(&[]), None);
    }

    struct SilentSensor;

    #[async_trait]
    impl ForceReader for SilentSensor {
        async fn read_force(&self) -> Result<f64> {
            Ok(0.0)
        }
    }

    #[tokio::test]
    async fn capture_hint_defaults_to_noop() {
        let sensor = SilentSensor;
        sensor.capture_hint(true);
        assert_eq!(sensor.read_force().await.unwrap(), 0.0);
    }
}
