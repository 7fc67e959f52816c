//! Simulated force source.
//!
//! Without contact the reader returns low-level noise in `[0, 2)`, well under
//! the default zero threshold. With contact it returns a ramp starting at 50
//! and rising by 5 per read. Clearing contact resets the ramp.
//!
//! # Example
//!
//! ```rust,ignore
//! use kettle_cycle::hardware::mock::MockForceReader;
//!
//! let reader = MockForceReader::builder()
//!     .name("bench-cell")
//!     .rng_seed(7)
//!     .build();
//! reader.set_contact(true);
//! let first = reader.read_force().await?; // 50.0
//! ```

use anyhow::Result;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::time::Duration;

use super::faults::{FaultConfig, MockRng};
use crate::hardware::capabilities::ForceReader;

/// First reading after contact begins.
pub const CONTACT_BASE_FORCE: f64 = 50.0;
/// Increase per read while in contact.
pub const CONTACT_RAMP_STEP: f64 = 5.0;
/// Upper bound (exclusive) of the no-contact noise floor.
pub const NOISE_CEILING: f64 = 2.0;

#[derive(Debug, Default)]
struct Ramp {
    contact: bool,
    step: u32,
}

/// Simulated load cell.
#[derive(Debug)]
pub struct MockForceReader {
    name: String,
    ramp: Mutex<Ramp>,
    rng: MockRng,
    faults: FaultConfig,
    read_latency: Option<Duration>,
    follow_capture: bool,
}

impl MockForceReader {
    /// Reader with default settings; contact follows the capture hint.
    pub fn new() -> Self {
        Self::builder().build()
    }

    /// Create a builder for a customized reader.
    pub fn builder() -> MockForceReaderBuilder {
        MockForceReaderBuilder::default()
    }

    /// Engage or release simulated contact.
    pub fn set_contact(&self, contact: bool) {
        let mut ramp = self.ramp.lock();
        if !contact {
            ramp.step = 0;
        }
        ramp.contact = contact;
    }

    /// Whether simulated contact is engaged.
    pub fn in_contact(&self) -> bool {
        self.ramp.lock().contact
    }

    /// Configured reader name.
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl Default for MockForceReader {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ForceReader for MockForceReader {
    async fn read_force(&self) -> Result<f64> {
        self.faults.check(&self.name, "read_force")?;

        if let Some(latency) = self.read_latency {
            tokio::time::sleep(latency).await;
        }

        let mut ramp = self.ramp.lock();
        if ramp.contact {
            let value = CONTACT_BASE_FORCE + CONTACT_RAMP_STEP * f64::from(ramp.step);
            ramp.step = ramp.step.saturating_add(1);
            Ok(value)
        } else {
            drop(ramp);
            Ok(self.rng.gen_range(0.0..NOISE_CEILING))
        }
    }

    fn capture_hint(&self, active: bool) {
        if self.follow_capture {
            self.set_contact(active);
        }
    }
}

/// Builder for [`MockForceReader`].
#[derive(Debug)]
pub struct MockForceReaderBuilder {
    name: String,
    faults: FaultConfig,
    rng_seed: Option<u64>,
    read_latency: Option<Duration>,
    follow_capture: bool,
}

impl Default for MockForceReaderBuilder {
    fn default() -> Self {
        Self {
            name: "mock-force".to_string(),
            faults: FaultConfig::none(),
            rng_seed: None,
            read_latency: None,
            follow_capture: true,
        }
    }
}

impl MockForceReaderBuilder {
    /// Set the reader name used in error messages
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Set fault injection configuration
    pub fn faults(mut self, faults: FaultConfig) -> Self {
        self.faults = faults;
        self
    }

    /// Seed the noise generator
    pub fn rng_seed(mut self, seed: u64) -> Self {
        self.rng_seed = Some(seed);
        self
    }

    /// Delay every read by `latency`
    pub fn read_latency(mut self, latency: Duration) -> Self {
        self.read_latency = Some(latency);
        self
    }

    /// Whether capture start/end toggles contact (default: true)
    pub fn follow_capture(mut self, follow: bool) -> Self {
        self.follow_capture = follow;
        self
    }

    /// Build the reader
    pub fn build(self) -> MockForceReader {
        MockForceReader {
            name: self.name,
            ramp: Mutex::new(Ramp::default()),
            rng: MockRng::new(self.rng_seed),
            faults: self.faults,
            read_latency: self.read_latency,
            follow_capture: self.follow_capture,
        }
    }
}
