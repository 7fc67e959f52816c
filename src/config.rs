//! Configuration System using Figment
//!
//! Configuration is loaded from:
//! 1. a TOML file (base configuration)
//! 2. environment variables prefixed with `KETTLE_`, nested keys separated by
//!    `__` (e.g. `KETTLE_FORCE_SENSOR__SAMPLE_RATE_HZ=100`)
//!
//! # Example
//! ```no_run
//! use kettle_cycle::config::KettleConfig;
//!
//! let config = KettleConfig::load_from("config/kettle-cycle.toml")?;
//! let dependencies = config.validate()?;
//! println!("{} needs {:?}", config.application.name, dependencies);
//! # Ok::<(), kettle_cycle::error::KettleError>(())
//! ```
//!
//! ```toml
//! [application]
//! name = "kettle-cycle"
//! log_level = "info"
//!
//! [controller]
//! arm = "ur5e"
//! resting_position = "resting-switch"
//! pour_prep_position = "pour-prep-switch"
//! force_sensor = "force-sensor"
//!
//! [force_sensor]
//! sample_rate_hz = 50.0
//! zero_threshold = 5.0
//! ```

use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::capture::CaptureSettings;
use crate::credentials::DEFAULT_CREDENTIALS_PATH;
use crate::error::{AppResult, KettleError};
use crate::trial::CycleTiming;

/// Default configuration file location.
pub const DEFAULT_CONFIG_PATH: &str = "config/kettle-cycle.toml";

const VALID_LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// Top-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KettleConfig {
    /// Application settings
    #[serde(default)]
    pub application: ApplicationConfig,
    /// Orchestrator wiring
    pub controller: ControllerConfig,
    /// Capture engine settings; defaults apply when absent
    #[serde(default)]
    pub force_sensor: Option<ForceSensorConfig>,
    /// Cycle timing overrides; defaults apply when absent
    #[serde(default)]
    pub timing: Option<TimingConfig>,
}

/// Application-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApplicationConfig {
    /// Application name
    #[serde(default = "default_app_name")]
    pub name: String,
    /// Logging level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Data-upload credentials file, read only when a camera is configured
    #[serde(default = "default_credentials_path")]
    pub credentials_path: PathBuf,
}

impl Default for ApplicationConfig {
    fn default() -> Self {
        Self {
            name: default_app_name(),
            log_level: default_log_level(),
            credentials_path: default_credentials_path(),
        }
    }
}

/// Orchestrator collaborators, by resource name.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ControllerConfig {
    /// Arm polled for motion status
    #[serde(default)]
    pub arm: String,
    /// Switch whose active position returns the arm to rest
    #[serde(default)]
    pub resting_position: String,
    /// Switch whose active position moves the arm to pour-prep
    #[serde(default)]
    pub pour_prep_position: String,
    /// Capture engine bracketing each cycle
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub force_sensor: Option<String>,
    /// Camera photographed after pour-prep
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub camera: Option<String>,
    /// Dataset receiving uploaded images (required with `camera`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dataset_id: Option<String>,
    /// Part the images are attributed to (required with `camera`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub part_id: Option<String>,
}

/// Capture engine configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForceSensorConfig {
    /// Scalar device read as the force source; the simulated reader is used when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub load_cell: Option<String>,
    /// Sampling frequency in Hz
    #[serde(default = "default_sample_rate")]
    pub sample_rate_hz: f64,
    /// Maximum samples kept per capture
    #[serde(default = "default_buffer_size")]
    pub buffer_size: usize,
    /// Readings strictly above this count as contact
    #[serde(default = "default_zero_threshold")]
    pub zero_threshold: f64,
    /// Open captures are abandoned after this many milliseconds
    #[serde(default = "default_capture_timeout")]
    pub capture_timeout_ms: u64,
}

impl Default for ForceSensorConfig {
    fn default() -> Self {
        Self {
            load_cell: None,
            sample_rate_hz: default_sample_rate(),
            buffer_size: default_buffer_size(),
            zero_threshold: default_zero_threshold(),
            capture_timeout_ms: default_capture_timeout(),
        }
    }
}

/// Cycle timing configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimingConfig {
    /// Interval between arm motion polls
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,
    /// Maximum wait for the arm to stop
    #[serde(default = "default_motion_timeout")]
    pub motion_timeout_ms: u64,
    /// Pause at the end of each cycle
    #[serde(default = "default_settle")]
    pub settle_ms: u64,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval(),
            motion_timeout_ms: default_motion_timeout(),
            settle_ms: default_settle(),
        }
    }
}

// Default value functions
fn default_app_name() -> String {
    "kettle-cycle".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_credentials_path() -> PathBuf {
    PathBuf::from(DEFAULT_CREDENTIALS_PATH)
}

fn default_sample_rate() -> f64 {
    50.0
}

fn default_buffer_size() -> usize {
    1000
}

fn default_zero_threshold() -> f64 {
    5.0
}

fn default_capture_timeout() -> u64 {
    30_000
}

fn default_poll_interval() -> u64 {
    50
}

fn default_motion_timeout() -> u64 {
    10_000
}

fn default_settle() -> u64 {
    1_000
}

fn required(path: &str, field: &str, value: &str) -> AppResult<()> {
    if value.is_empty() {
        return Err(KettleError::Configuration(format!(
            "{path}: {field} is required"
        )));
    }
    Ok(())
}

fn non_empty(value: Option<&String>) -> Option<&str> {
    value.map(String::as_str).filter(|v| !v.is_empty())
}

impl ControllerConfig {
    /// Check required fields and return the names of the resources this
    /// controller depends on, in wiring order.
    pub fn validate(&self, path: &str) -> AppResult<Vec<String>> {
        required(path, "arm", &self.arm)?;
        required(path, "resting_position", &self.resting_position)?;
        required(path, "pour_prep_position", &self.pour_prep_position)?;

        if self.camera().is_some()
            && (non_empty(self.dataset_id.as_ref()).is_none()
                || non_empty(self.part_id.as_ref()).is_none())
        {
            return Err(KettleError::Configuration(format!(
                "{path}: camera requires dataset_id and part_id"
            )));
        }

        let mut deps = vec![
            self.arm.clone(),
            self.resting_position.clone(),
            self.pour_prep_position.clone(),
        ];
        deps.extend(self.force_sensor().map(str::to_string));
        deps.extend(self.camera().map(str::to_string));
        Ok(deps)
    }

    /// Configured capture engine name, ignoring empty strings.
    pub fn force_sensor(&self) -> Option<&str> {
        non_empty(self.force_sensor.as_ref())
    }

    /// Configured camera name, ignoring empty strings.
    pub fn camera(&self) -> Option<&str> {
        non_empty(self.camera.as_ref())
    }
}

impl ForceSensorConfig {
    /// Check ranges and return the load cell dependency, if any.
    pub fn validate(&self, path: &str) -> AppResult<Vec<String>> {
        self.settings().validate().map_err(|e| match e {
            KettleError::Configuration(msg) => KettleError::Configuration(format!("{path}: {msg}")),
            other => other,
        })?;
        if !self.zero_threshold.is_finite() || self.zero_threshold < 0.0 {
            return Err(KettleError::Configuration(format!(
                "{path}: zero_threshold must be non-negative, got {}",
                self.zero_threshold
            )));
        }
        if self.capture_timeout_ms == 0 {
            return Err(KettleError::Configuration(format!(
                "{path}: capture_timeout_ms must be positive"
            )));
        }
        Ok(non_empty(self.load_cell.as_ref())
            .map(|name| vec![name.to_string()])
            .unwrap_or_default())
    }

    /// Settings for a capture engine.
    pub fn settings(&self) -> CaptureSettings {
        CaptureSettings {
            sample_rate_hz: self.sample_rate_hz,
            buffer_size: self.buffer_size,
            zero_threshold: self.zero_threshold,
            capture_timeout: Duration::from_millis(self.capture_timeout_ms),
        }
    }
}

impl TimingConfig {
    /// Check that the poll interval can drive a timer.
    pub fn validate(&self, path: &str) -> AppResult<()> {
        if self.poll_interval_ms == 0 {
            return Err(KettleError::Configuration(format!(
                "{path}: poll_interval_ms must be positive"
            )));
        }
        Ok(())
    }

    /// Timing policy for the orchestrator.
    pub fn cycle_timing(&self) -> CycleTiming {
        CycleTiming {
            poll_interval: Duration::from_millis(self.poll_interval_ms),
            motion_timeout: Duration::from_millis(self.motion_timeout_ms),
            settle: Duration::from_millis(self.settle_ms),
        }
    }
}

impl KettleConfig {
    /// Load configuration from the default path and environment variables.
    pub fn load() -> AppResult<Self> {
        Self::load_from(DEFAULT_CONFIG_PATH)
    }

    /// Load configuration from a specific file path
    ///
    /// Environment variables override the file, e.g.
    /// `KETTLE_CONTROLLER__ARM=ur5e` or `KETTLE_APPLICATION__LOG_LEVEL=debug`.
    pub fn load_from<P: AsRef<Path>>(path: P) -> AppResult<Self> {
        Ok(Figment::new()
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed("KETTLE_").split("__"))
            .extract()?)
    }

    /// Validate every section and return all resource dependencies.
    pub fn validate(&self) -> AppResult<Vec<String>> {
        if !VALID_LOG_LEVELS.contains(&self.application.log_level.to_lowercase().as_str()) {
            return Err(KettleError::Configuration(format!(
                "Invalid log_level '{}'. Must be one of: {}",
                self.application.log_level,
                VALID_LOG_LEVELS.join(", ")
            )));
        }

        let mut deps = self.controller.validate("controller")?;
        if let Some(force) = &self.force_sensor {
            deps.extend(force.validate("force_sensor")?);
        }
        if let Some(timing) = &self.timing {
            timing.validate("timing")?;
        }
        Ok(deps)
    }

    /// Capture engine settings, falling back to defaults.
    pub fn capture_settings(&self) -> CaptureSettings {
        self.force_sensor.clone().unwrap_or_default().settings()
    }

    /// Cycle timing, falling back to defaults.
    pub fn cycle_timing(&self) -> CycleTiming {
        self.timing.unwrap_or_default().cycle_timing()
    }
}

#[cfg(test)]
#[allow(clippy::float_cmp)]
mod tests {
    use super::*;
    use figment::Jail;

    fn controller() -> ControllerConfig {
        ControllerConfig {
            arm: "arm".into(),
            resting_position: "resting".into(),
            pour_prep_position: "pour-prep".into(),
            ..ControllerConfig::default()
        }
    }

    #[test]
    fn test_missing_required_fields() {
        for (field, cfg) in [
            ("arm", ControllerConfig { arm: String::new(), ..controller() }),
            (
                "resting_position",
                ControllerConfig { resting_position: String::new(), ..controller() },
            ),
            (
                "pour_prep_position",
                ControllerConfig { pour_prep_position: String::new(), ..controller() },
            ),
        ] {
            let err = cfg.validate("controller").unwrap_err();
            assert_eq!(
                err.to_string(),
                format!("Configuration validation error: controller: {field} is required")
            );
        }
    }

    #[test]
    fn test_base_dependencies() {
        let deps = controller().validate("controller").unwrap();
        assert_eq!(deps, vec!["arm", "resting", "pour-prep"]);
    }

    #[test]
    fn test_optional_dependencies() {
        let cfg = ControllerConfig {
            force_sensor: Some("force".into()),
            camera: Some("cam".into()),
            dataset_id: Some("ds".into()),
            part_id: Some("part".into()),
            ..controller()
        };
        let deps = cfg.validate("controller").unwrap();
        assert_eq!(deps, vec!["arm", "resting", "pour-prep", "force", "cam"]);
    }

    #[test]
    fn test_camera_requires_dataset_and_part() {
        let cfg = ControllerConfig {
            camera: Some("cam".into()),
            dataset_id: Some("ds".into()),
            ..controller()
        };
        let err = cfg.validate("controller").unwrap_err();
        assert!(err.to_string().contains("camera requires dataset_id and part_id"));
    }

    #[test]
    fn test_force_sensor_defaults() {
        let cfg = ForceSensorConfig::default();
        assert!(cfg.validate("force_sensor").unwrap().is_empty());
        let settings = cfg.settings();
        assert_eq!(settings, CaptureSettings::default());
    }

    #[test]
    fn test_force_sensor_load_cell_dependency() {
        let cfg = ForceSensorConfig {
            load_cell: Some("adc-0".into()),
            ..ForceSensorConfig::default()
        };
        assert_eq!(cfg.validate("force_sensor").unwrap(), vec!["adc-0"]);
    }

    #[test]
    fn test_force_sensor_ranges() {
        let bad = [
            ForceSensorConfig { sample_rate_hz: 0.0, ..Default::default() },
            ForceSensorConfig { buffer_size: 0, ..Default::default() },
            ForceSensorConfig { zero_threshold: -1.0, ..Default::default() },
            ForceSensorConfig { capture_timeout_ms: 0, ..Default::default() },
            ForceSensorConfig { sample_rate_hz: 1e-30, ..Default::default() },
            ForceSensorConfig { buffer_size: usize::MAX, ..Default::default() },
        ];
        for cfg in bad {
            assert!(cfg.validate("force_sensor").is_err(), "{cfg:?}");
        }
    }

    #[test]
    fn test_timing_defaults_match_cycle_policy() {
        assert_eq!(TimingConfig::default().cycle_timing(), CycleTiming::default());
        assert!(TimingConfig { poll_interval_ms: 0, ..Default::default() }
            .validate("timing")
            .is_err());
    }

    #[test]
    fn test_load_with_env_override() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "kettle.toml",
                r#"
                [application]
                log_level = "debug"

                [controller]
                arm = "ur5e"
                resting_position = "resting"
                pour_prep_position = "pour-prep"
                force_sensor = "force"

                [force_sensor]
                sample_rate_hz = 100.0
                "#,
            )?;
            jail.set_env("KETTLE_CONTROLLER__ARM", "ur10");

            let config = KettleConfig::load_from("kettle.toml").map_err(|e| e.to_string())?;
            assert_eq!(config.application.name, "kettle-cycle");
            assert_eq!(config.application.log_level, "debug");
            assert_eq!(config.controller.arm, "ur10");
            assert_eq!(config.capture_settings().sample_rate_hz, 100.0);
            assert_eq!(config.capture_settings().buffer_size, 1000);
            assert_eq!(config.cycle_timing(), CycleTiming::default());

            let deps = config.validate().map_err(|e| e.to_string())?;
            assert_eq!(deps, vec!["ur10", "resting", "pour-prep", "force"]);
            Ok(())
        });
    }

    #[test]
    fn test_missing_controller_section() {
        Jail::expect_with(|jail| {
            jail.create_file("kettle.toml", "[application]\nname = \"x\"\n")?;
            let err = KettleConfig::load_from("kettle.toml").unwrap_err();
            assert!(matches!(err, KettleError::Config(_)));
            Ok(())
        });
    }

    #[test]
    fn test_invalid_log_level() {
        let config = KettleConfig {
            application: ApplicationConfig {
                log_level: "loud".into(),
                ..ApplicationConfig::default()
            },
            controller: controller(),
            force_sensor: None,
            timing: None,
        };
        assert!(config.validate().is_err());
    }
}
