//! Load-cell force source.
//!
//! Wraps any [`Readable`] scalar device (typically an ADC channel behind a
//! load-cell amplifier) and converts its raw reading into a force magnitude:
//! `force = |raw * scale + offset|`.

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::sync::Arc;

use super::capabilities::{ForceReader, Readable};

/// Force source backed by a generic scalar device.
pub struct LoadCellReader {
    name: String,
    device: Arc<dyn Readable>,
    scale: f64,
    offset: f64,
}

impl std::fmt::Debug for LoadCellReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoadCellReader")
            .field("name", &self.name)
            .field("device", &"<Arc<dyn Readable>>")
            .field("scale", &self.scale)
            .field("offset", &self.offset)
            .finish()
    }
}

impl LoadCellReader {
    /// Use the device reading as-is.
    pub fn new(name: impl Into<String>, device: Arc<dyn Readable>) -> Self {
        Self {
            name: name.into(),
            device,
            scale: 1.0,
            offset: 0.0,
        }
    }

    /// Apply a linear calibration to each raw reading.
    #[must_use]
    pub fn with_calibration(mut self, scale: f64, offset: f64) -> Self {
        self.scale = scale;
        self.offset = offset;
        self
    }
}

#[async_trait]
impl ForceReader for LoadCellReader {
    async fn read_force(&self) -> Result<f64> {
        let raw = self
            .device
            .read()
            .await
            .with_context(|| format!("reading load cell '{}'", self.name))?;
        if !raw.is_finite() {
            anyhow::bail!("load cell '{}' returned non-finite value {raw}", self.name);
        }
        Ok((raw * self.scale + self.offset).abs())
    }
}
