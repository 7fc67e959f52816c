//! Simulated camera and dataset upload client.

use anyhow::Result;
use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use parking_lot::Mutex;

use super::faults::FaultConfig;
use crate::hardware::capabilities::{
    Camera, ImageMetadata, MimeType, UploadClient, UploadOptions,
};

/// Minimal JPEG-framed payload (SOI, APP0 marker, EOI).
const FAKE_JPEG: &[u8] = &[
    0xFF, 0xD8, 0xFF, 0xE0, 0x00, 0x10, b'J', b'F', b'I', b'F', 0x00, 0x01, 0xFF, 0xD9,
];

/// Simulated camera returning a fixed payload.
#[derive(Debug)]
pub struct MockCamera {
    name: String,
    payload: Bytes,
    mime_type: String,
    faults: FaultConfig,
    captures: Mutex<u64>,
}

impl MockCamera {
    /// Camera returning a tiny JPEG-signature payload.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            payload: Bytes::from_static(FAKE_JPEG),
            mime_type: MimeType::Jpeg.as_str().to_string(),
            faults: FaultConfig::none(),
            captures: Mutex::new(0),
        }
    }

    /// Return `payload` labelled as `mime_type` instead.
    #[must_use]
    pub fn with_payload(mut self, payload: Bytes, mime_type: impl Into<String>) -> Self {
        self.payload = payload;
        self.mime_type = mime_type.into();
        self
    }

    /// Attach fault injection.
    #[must_use]
    pub fn with_faults(mut self, faults: FaultConfig) -> Self {
        self.faults = faults;
        self
    }

    /// Number of successful captures.
    pub fn capture_count(&self) -> u64 {
        *self.captures.lock()
    }
}

#[async_trait]
impl Camera for MockCamera {
    async fn capture_image(&self, _mime_type: &str) -> Result<(Bytes, ImageMetadata)> {
        self.faults.check(&self.name, "capture_image")?;
        *self.captures.lock() += 1;
        Ok((
            self.payload.clone(),
            ImageMetadata {
                mime_type: self.mime_type.clone(),
                captured_at: Utc::now(),
            },
        ))
    }
}

/// One upload observed by [`MockUploader`].
#[derive(Debug, Clone, PartialEq)]
pub struct UploadRecord {
    /// Returned file id
    pub file_id: String,
    /// Part the image was attributed to
    pub part_id: String,
    /// Target datasets
    pub dataset_ids: Vec<String>,
    /// Tags attached to the image
    pub tags: Vec<String>,
    /// Declared image format
    pub mime_type: MimeType,
    /// Payload size in bytes
    pub size: usize,
}

/// Simulated upload client that records every upload.
#[derive(Debug, Default)]
pub struct MockUploader {
    uploads: Mutex<Vec<UploadRecord>>,
    faults: FaultConfig,
}

impl MockUploader {
    /// Uploader with no faults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach fault injection.
    #[must_use]
    pub fn with_faults(mut self, faults: FaultConfig) -> Self {
        self.faults = faults;
        self
    }

    /// Uploads recorded so far.
    pub fn uploads(&self) -> Vec<UploadRecord> {
        self.uploads.lock().clone()
    }
}

#[async_trait]
impl UploadClient for MockUploader {
    async fn upload_image(
        &self,
        part_id: &str,
        image: Bytes,
        dataset_ids: &[String],
        tags: &[String],
        mime_type: MimeType,
        _options: &UploadOptions,
    ) -> Result<String> {
        self.faults.check("mock-uploader", "upload_image")?;
        let mut uploads = self.uploads.lock();
        let file_id = format!("file-{}", uploads.len() + 1);
        uploads.push(UploadRecord {
            file_id: file_id.clone(),
            part_id: part_id.to_string(),
            dataset_ids: dataset_ids.to_vec(),
            tags: tags.to_vec(),
            mime_type,
            size: image.len(),
        });
        Ok(file_id)
    }
}
