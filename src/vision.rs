//! Photograph-and-upload step of a cycle.

use std::sync::Arc;
use tracing::info;

use crate::capture::TrialMetadata;
use crate::error::{AppResult, KettleError};
use crate::hardware::capabilities::{Camera, MimeType, UploadClient, UploadOptions};

/// Tag value used when a cycle runs outside a trial.
pub const STANDALONE_TRIAL: &str = "standalone";

/// Tags attached to every uploaded image.
pub fn format_capture_tags(trial_id: &str, cycle_count: u64) -> Vec<String> {
    let trial_id = if trial_id.is_empty() {
        STANDALONE_TRIAL
    } else {
        trial_id
    };
    vec![
        format!("trial_id:{trial_id}"),
        format!("cycle_count:{cycle_count}"),
    ]
}

/// Camera plus upload client bound to one dataset and part.
pub struct ImageUploader {
    camera: Arc<dyn Camera>,
    client: Arc<dyn UploadClient>,
    dataset_id: String,
    part_id: String,
}

impl std::fmt::Debug for ImageUploader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImageUploader")
            .field("camera", &"<Arc<dyn Camera>>")
            .field("client", &"<Arc<dyn UploadClient>>")
            .field("dataset_id", &self.dataset_id)
            .field("part_id", &self.part_id)
            .finish()
    }
}

impl ImageUploader {
    /// Bind a camera and upload client to a dataset and part.
    pub fn new(
        camera: Arc<dyn Camera>,
        client: Arc<dyn UploadClient>,
        dataset_id: impl Into<String>,
        part_id: impl Into<String>,
    ) -> Self {
        Self {
            camera,
            client,
            dataset_id: dataset_id.into(),
            part_id: part_id.into(),
        }
    }

    /// Capture one image and upload it tagged with the cycle's trial labels.
    ///
    /// Returns the uploaded file id. Any failure, including an empty or
    /// unrecognized image, is a [`KettleError::Vision`].
    pub async fn capture_and_upload(&self, metadata: Option<&TrialMetadata>) -> AppResult<String> {
        let (image, meta) = self
            .camera
            .capture_image(MimeType::Jpeg.as_str())
            .await
            .map_err(|e| KettleError::Vision(format!("getting image from camera: {e:#}")))?;

        if image.is_empty() {
            return Err(KettleError::Vision("camera returned empty image".to_string()));
        }
        let mime_type = MimeType::sniff(&image).ok_or_else(|| {
            KettleError::Vision(format!(
                "unrecognized image format (camera reported '{}')",
                meta.mime_type
            ))
        })?;
        info!(bytes = image.len(), format = %mime_type, "captured image");

        let (trial_id, cycle_count) = metadata
            .map(|m| (m.trial_id.as_str(), m.cycle_count))
            .unwrap_or_default();
        let tags = format_capture_tags(trial_id, cycle_count);
        let datasets = [self.dataset_id.clone()];

        let file_id = self
            .client
            .upload_image(
                &self.part_id,
                image,
                &datasets,
                &tags,
                mime_type,
                &UploadOptions::default(),
            )
            .await
            .map_err(|e| KettleError::Vision(format!("uploading image: {e:#}")))?;

        info!(file_id = %file_id, dataset_id = %self.dataset_id, ?tags, "uploaded image");
        Ok(file_id)
    }
}
