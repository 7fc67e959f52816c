//! Composition root.
//!
//! Collaborators are registered by name in a [`Dependencies`] set; the factory
//! functions resolve the names a configuration refers to and assemble a
//! capture engine or a trial orchestrator from them.
//!
//! ```rust,ignore
//! let engine = build_capture_engine("force-sensor", &force_cfg, &deps).await?;
//! let deps = deps.with_force_capture("force-sensor", engine.clone());
//! let orchestrator = build_orchestrator(&config, &deps, &config.application.credentials_path).await?;
//! ```

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tracing::info;

use crate::capture::{CaptureEngine, ForceCapture};
use crate::config::{ForceSensorConfig, KettleConfig};
use crate::credentials::DataCredentials;
use crate::error::{AppResult, KettleError};
use crate::hardware::capabilities::{
    Actuator, Camera, ForceReader, PositionSwitch, Readable, UploadClient,
};
use crate::hardware::load_cell::LoadCellReader;
use crate::hardware::mock::MockForceReader;
use crate::trial::TrialOrchestrator;
use crate::vision::ImageUploader;

/// Opens an upload client once credentials are known.
#[async_trait]
pub trait UploadConnector: Send + Sync {
    /// Authenticate and return a ready client.
    async fn connect(&self, credentials: &DataCredentials) -> anyhow::Result<Arc<dyn UploadClient>>;
}

/// Named collaborators, grouped by role.
#[derive(Default)]
pub struct Dependencies {
    actuators: HashMap<String, Arc<dyn Actuator>>,
    switches: HashMap<String, Arc<dyn PositionSwitch>>,
    force_captures: HashMap<String, Arc<dyn ForceCapture>>,
    load_cells: HashMap<String, Arc<dyn Readable>>,
    cameras: HashMap<String, Arc<dyn Camera>>,
    upload_connector: Option<Arc<dyn UploadConnector>>,
}

impl std::fmt::Debug for Dependencies {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        fn names<T: ?Sized>(map: &HashMap<String, Arc<T>>) -> Vec<&str> {
            let mut names: Vec<_> = map.keys().map(String::as_str).collect();
            names.sort_unstable();
            names
        }
        f.debug_struct("Dependencies")
            .field("actuators", &names(&self.actuators))
            .field("switches", &names(&self.switches))
            .field("force_captures", &names(&self.force_captures))
            .field("load_cells", &names(&self.load_cells))
            .field("cameras", &names(&self.cameras))
            .field("upload_connector", &self.upload_connector.is_some())
            .finish()
    }
}

fn lookup<T: ?Sized>(
    map: &HashMap<String, Arc<T>>,
    role: &'static str,
    name: &str,
) -> AppResult<Arc<T>> {
    map.get(name)
        .cloned()
        .ok_or_else(|| KettleError::MissingDependency {
            role,
            name: name.to_string(),
        })
}

impl Dependencies {
    /// Empty dependency set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an arm.
    #[must_use]
    pub fn with_actuator(mut self, name: impl Into<String>, arm: Arc<dyn Actuator>) -> Self {
        self.actuators.insert(name.into(), arm);
        self
    }

    /// Register a saved-pose switch.
    #[must_use]
    pub fn with_switch(mut self, name: impl Into<String>, switch: Arc<dyn PositionSwitch>) -> Self {
        self.switches.insert(name.into(), switch);
        self
    }

    /// Register a capture engine (or any other force capture).
    #[must_use]
    pub fn with_force_capture(
        mut self,
        name: impl Into<String>,
        capture: Arc<dyn ForceCapture>,
    ) -> Self {
        self.force_captures.insert(name.into(), capture);
        self
    }

    /// Register a scalar device usable as a load cell.
    #[must_use]
    pub fn with_load_cell(mut self, name: impl Into<String>, device: Arc<dyn Readable>) -> Self {
        self.load_cells.insert(name.into(), device);
        self
    }

    /// Register a camera.
    #[must_use]
    pub fn with_camera(mut self, name: impl Into<String>, camera: Arc<dyn Camera>) -> Self {
        self.cameras.insert(name.into(), camera);
        self
    }

    /// Set the connector used to open the upload client.
    #[must_use]
    pub fn with_upload_connector(mut self, connector: Arc<dyn UploadConnector>) -> Self {
        self.upload_connector = Some(connector);
        self
    }

    /// Look up an arm.
    pub fn actuator(&self, name: &str) -> AppResult<Arc<dyn Actuator>> {
        lookup(&self.actuators, "arm", name)
    }

    /// Look up a switch; `role` names the config field for error messages.
    pub fn switch(&self, role: &'static str, name: &str) -> AppResult<Arc<dyn PositionSwitch>> {
        lookup(&self.switches, role, name)
    }

    /// Look up a force capture.
    pub fn force_capture(&self, name: &str) -> AppResult<Arc<dyn ForceCapture>> {
        lookup(&self.force_captures, "force_sensor", name)
    }

    /// Look up a load cell device.
    pub fn load_cell(&self, name: &str) -> AppResult<Arc<dyn Readable>> {
        lookup(&self.load_cells, "load_cell", name)
    }

    /// Look up a camera.
    pub fn camera(&self, name: &str) -> AppResult<Arc<dyn Camera>> {
        lookup(&self.cameras, "camera", name)
    }
}

/// Build a capture engine and start its sampling loop.
///
/// Reads from the configured load cell, or from a simulated force source when
/// none is configured.
pub async fn build_capture_engine(
    name: &str,
    config: &ForceSensorConfig,
    deps: &Dependencies,
) -> AppResult<Arc<CaptureEngine>> {
    config.validate(name)?;

    let reader: Arc<dyn ForceReader> = match config.load_cell.as_deref().filter(|n| !n.is_empty()) {
        Some(cell) => {
            info!(engine = name, load_cell = cell, "capture engine reading load cell");
            Arc::new(LoadCellReader::new(cell, deps.load_cell(cell)?))
        }
        None => {
            info!(engine = name, "no load cell configured, using simulated force source");
            Arc::new(MockForceReader::builder().name(format!("{name}-sim")).build())
        }
    };

    let engine = Arc::new(CaptureEngine::new(name, config.settings(), reader)?);
    engine.start();
    Ok(engine)
}

/// Build a trial orchestrator from its configuration.
///
/// Credentials are read from `credentials_path` only when a camera is
/// configured; a missing or malformed file is then fatal.
pub async fn build_orchestrator(
    config: &KettleConfig,
    deps: &Dependencies,
    credentials_path: &Path,
) -> AppResult<TrialOrchestrator> {
    let controller = &config.controller;
    controller.validate("controller")?;
    if let Some(timing) = &config.timing {
        timing.validate("timing")?;
    }

    let arm = deps.actuator(&controller.arm)?;
    let resting = deps.switch("resting_position", &controller.resting_position)?;
    let pour_prep = deps.switch("pour_prep_position", &controller.pour_prep_position)?;

    let mut builder =
        TrialOrchestrator::builder(arm, resting, pour_prep).timing(config.cycle_timing());

    if let Some(name) = controller.force_sensor() {
        builder = builder.force_capture(deps.force_capture(name)?);
    }

    if let Some(name) = controller.camera() {
        let camera = deps.camera(name)?;
        let credentials = DataCredentials::load(credentials_path).map_err(|e| {
            KettleError::Credentials(format!(
                "camera configured but failed to read API credentials: {e}"
            ))
        })?;
        let connector = deps
            .upload_connector
            .as_ref()
            .ok_or_else(|| KettleError::MissingDependency {
                role: "upload_connector",
                name: name.to_string(),
            })?;
        let client = connector.connect(&credentials).await.map_err(|e| {
            KettleError::Configuration(format!("creating upload client: {e:#}"))
        })?;

        // validate() guarantees both ids are present alongside a camera
        let dataset_id = controller.dataset_id.clone().unwrap_or_default();
        let part_id = controller.part_id.clone().unwrap_or_default();
        info!(camera = name, dataset_id = %dataset_id, "controller using camera");
        builder = builder.vision(ImageUploader::new(camera, client, dataset_id, part_id));
    }

    Ok(builder.build())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ApplicationConfig, ControllerConfig};
    use crate::hardware::mock::{MockArm, MockCamera, MockSwitch, MockUploader};
    use std::io::Write;
    use std::time::Duration;

    struct RecordingConnector(Arc<MockUploader>);

    #[async_trait]
    impl UploadConnector for RecordingConnector {
        async fn connect(
            &self,
            _credentials: &DataCredentials,
        ) -> anyhow::Result<Arc<dyn UploadClient>> {
            Ok(self.0.clone())
        }
    }

    fn deps() -> Dependencies {
        let arm = Arc::new(MockArm::new(Duration::from_millis(5)));
        Dependencies::new()
            .with_actuator("arm", arm.clone())
            .with_switch("resting", Arc::new(MockSwitch::new("resting", arm.clone())))
            .with_switch("pour-prep", Arc::new(MockSwitch::new("pour-prep", arm)))
            .with_camera("cam", Arc::new(MockCamera::new("cam")))
            .with_upload_connector(Arc::new(RecordingConnector(Arc::new(MockUploader::new()))))
    }

    fn config(controller: ControllerConfig) -> KettleConfig {
        KettleConfig {
            application: ApplicationConfig::default(),
            controller,
            force_sensor: None,
            timing: None,
        }
    }

    fn base_controller() -> ControllerConfig {
        ControllerConfig {
            arm: "arm".into(),
            resting_position: "resting".into(),
            pour_prep_position: "pour-prep".into(),
            ..ControllerConfig::default()
        }
    }

    #[tokio::test]
    async fn builds_minimal_orchestrator() {
        let orch = build_orchestrator(
            &config(base_controller()),
            &deps(),
            Path::new("/nonexistent/creds.json"),
        )
        .await
        .unwrap();
        assert_eq!(orch.status().trial_id, "");
    }

    #[tokio::test]
    async fn missing_arm_names_the_role() {
        let cfg = config(ControllerConfig {
            arm: "ghost".into(),
            ..base_controller()
        });
        let err = build_orchestrator(&cfg, &deps(), Path::new("/nonexistent"))
            .await
            .unwrap_err();
        assert!(err.to_string().starts_with("getting arm"));
    }

    #[tokio::test]
    async fn camera_without_credentials_fails() {
        let cfg = config(ControllerConfig {
            camera: Some("cam".into()),
            dataset_id: Some("ds".into()),
            part_id: Some("part".into()),
            ..base_controller()
        });
        let dir = tempfile::tempdir().unwrap();
        let err = build_orchestrator(&cfg, &deps(), &dir.path().join("missing.json"))
            .await
            .unwrap_err();
        assert!(matches!(err, KettleError::Credentials(_)));
        assert!(err.to_string().contains("credentials"));
    }

    #[tokio::test]
    async fn camera_with_credentials_builds() {
        let cfg = config(ControllerConfig {
            camera: Some("cam".into()),
            dataset_id: Some("ds".into()),
            part_id: Some("part".into()),
            ..base_controller()
        });
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(br#"{"api_key": "k", "api_key_id": "id"}"#)
            .unwrap();
        assert!(build_orchestrator(&cfg, &deps(), file.path()).await.is_ok());
    }

    #[tokio::test]
    async fn capture_engine_falls_back_to_simulated_source() {
        let engine = build_capture_engine("force", &ForceSensorConfig::default(), &Dependencies::new())
            .await
            .unwrap();
        assert_eq!(engine.name(), "force");
        engine.close().await;
    }

    #[tokio::test]
    async fn capture_engine_rejects_unusable_rate() {
        let cfg = ForceSensorConfig {
            sample_rate_hz: 1e-30,
            ..ForceSensorConfig::default()
        };
        let err = build_capture_engine("force", &cfg, &Dependencies::new())
            .await
            .unwrap_err();
        assert!(matches!(err, KettleError::Configuration(ref msg) if msg.starts_with("force: sample_rate_hz")));
    }

    #[tokio::test]
    async fn capture_engine_requires_registered_load_cell() {
        let cfg = ForceSensorConfig {
            load_cell: Some("adc".into()),
            ..ForceSensorConfig::default()
        };
        let err = build_capture_engine("force", &cfg, &Dependencies::new())
            .await
            .unwrap_err();
        assert!(matches!(err, KettleError::MissingDependency { role: "load_cell", .. }));
    }
}
