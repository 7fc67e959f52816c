//! CLI Entry Point for kettle-cycle
//!
//! Runs the orchestrator against a fully simulated cell (mock arm, switches,
//! force source and camera), wired from a configuration file when one is given.
//!
//! # Usage
//!
//! Run one cycle and print the result:
//! ```bash
//! kettle-cycle cycle
//! ```
//!
//! Run a three-cycle trial:
//! ```bash
//! kettle-cycle --config config/kettle-cycle.toml trial --cycles 3
//! ```
//!
//! Validate a configuration file:
//! ```bash
//! kettle-cycle check-config config/kettle-cycle.toml --show
//! ```

use anyhow::{Context, Result};
use async_trait::async_trait;
use clap::{Parser, Subcommand};
use kettle_cycle::config::{ApplicationConfig, ControllerConfig, KettleConfig};
use kettle_cycle::credentials::DataCredentials;
use kettle_cycle::factory::UploadConnector;
use kettle_cycle::hardware::mock::{MockArm, MockCamera, MockSwitch, MockUploader};
use kettle_cycle::hardware::UploadClient;
use kettle_cycle::logging::{self, OutputFormat, TracingConfig};
use kettle_cycle::trial::TrialStatus;
use kettle_cycle::{build_capture_engine, build_orchestrator, CaptureEngine, Dependencies};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

#[derive(Parser)]
#[command(name = "kettle-cycle")]
#[command(about = "Kettle pour-cycle test rig with force capture", long_about = None)]
struct Cli {
    /// Configuration file (defaults to a built-in simulated cell)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Override the configured log level
    #[arg(long, global = true)]
    log_level: Option<String>,

    /// Log output format
    #[arg(long, global = true, value_enum, default_value_t = OutputFormat::Compact)]
    log_format: OutputFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a single cycle and print its result
    Cycle,

    /// Run a trial until the given number of cycles has completed
    Trial {
        /// Number of cycles to run
        #[arg(long, default_value = "3")]
        cycles: u64,

        /// Give up after this many seconds
        #[arg(long, default_value = "300")]
        timeout_secs: u64,
    },

    /// Load and validate a configuration file
    CheckConfig {
        /// Path to the TOML configuration
        path: PathBuf,

        /// Print the merged configuration (file plus environment) as TOML
        #[arg(long)]
        show: bool,
    },
}

/// Hands out the simulated uploader regardless of credentials.
struct SimulatedConnector(Arc<MockUploader>);

#[async_trait]
impl UploadConnector for SimulatedConnector {
    async fn connect(&self, credentials: &DataCredentials) -> Result<Arc<dyn UploadClient>> {
        info!(api_key_id = %credentials.api_key_id, "connecting simulated upload client");
        Ok(self.0.clone())
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if let Commands::CheckConfig { path, show } = &cli.command {
        return check_config(path, *show);
    }

    let config = match &cli.config {
        Some(path) => KettleConfig::load_from(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => simulated_config(),
    };
    config.validate()?;

    let level = cli
        .log_level
        .as_deref()
        .unwrap_or(&config.application.log_level);
    logging::init(TracingConfig::new(logging::parse_log_level(level)?).with_format(cli.log_format))?;

    let (deps, engine) = simulated_cell(&config).await?;
    let orchestrator =
        build_orchestrator(&config, &deps, &config.application.credentials_path).await?;

    let outcome = match cli.command {
        Commands::Cycle => {
            let report = orchestrator.execute_cycle().await?;
            print_json(&report)
        }
        Commands::Trial {
            cycles,
            timeout_secs,
        } => {
            let started = orchestrator.start()?;
            info!(trial_id = %started.trial_id, cycles, "running trial");
            let waited = tokio::time::timeout(
                Duration::from_secs(timeout_secs),
                wait_for_cycles(|| orchestrator.status(), cycles),
            )
            .await;
            let stopped = orchestrator.stop()?;
            waited.with_context(|| format!("trial did not reach {cycles} cycles in time"))?;
            print_json(&stopped)
        }
        Commands::CheckConfig { .. } => Ok(()),
    };

    orchestrator.close().await;
    if let Some(engine) = engine {
        engine.close().await;
    }
    outcome
}

fn check_config(path: &Path, show: bool) -> Result<()> {
    let config = KettleConfig::load_from(path)
        .with_context(|| format!("loading {}", path.display()))?;
    let dependencies = config.validate()?;
    if show {
        print!("{}", toml::to_string_pretty(&config)?);
    }
    print_json(&serde_json::json!({
        "valid": true,
        "dependencies": dependencies,
    }))
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Poll until `target` cycles have finished.
///
/// Cycle N begins only after cycle N-1 is stamped, so once the counter reads
/// `target` the stamp seen at that moment belongs to the previous cycle; the
/// target cycle is done when the stamp changes or the next cycle begins.
async fn wait_for_cycles(status: impl Fn() -> TrialStatus, target: u64) {
    let mut stamp_at_target: Option<String> = None;
    let mut ticker = tokio::time::interval(Duration::from_millis(100));
    loop {
        ticker.tick().await;
        let current = status();
        if current.cycle_count > target {
            return;
        }
        if current.cycle_count == target {
            match &stamp_at_target {
                None => stamp_at_target = Some(current.last_cycle_at),
                Some(previous) if *previous != current.last_cycle_at => return,
                Some(_) => {}
            }
        }
    }
}

/// Built-in configuration naming one simulated device per role.
fn simulated_config() -> KettleConfig {
    KettleConfig {
        application: ApplicationConfig::default(),
        controller: ControllerConfig {
            arm: "sim-arm".into(),
            resting_position: "sim-resting".into(),
            pour_prep_position: "sim-pour-prep".into(),
            force_sensor: Some("sim-force".into()),
            ..ControllerConfig::default()
        },
        force_sensor: None,
        timing: None,
    }
}

/// Register a simulated device under every name the configuration references.
async fn simulated_cell(config: &KettleConfig) -> Result<(Dependencies, Option<Arc<CaptureEngine>>)> {
    let controller = &config.controller;
    let arm = Arc::new(MockArm::default());

    let mut deps = Dependencies::new()
        .with_actuator(controller.arm.clone(), arm.clone())
        .with_switch(
            controller.resting_position.clone(),
            Arc::new(MockSwitch::new(controller.resting_position.clone(), arm.clone())),
        )
        .with_switch(
            controller.pour_prep_position.clone(),
            Arc::new(MockSwitch::new(controller.pour_prep_position.clone(), arm)),
        );

    if let Some(camera) = controller.camera() {
        deps = deps
            .with_camera(camera, Arc::new(MockCamera::new(camera)))
            .with_upload_connector(Arc::new(SimulatedConnector(Arc::new(MockUploader::new()))));
    }

    let mut engine = None;
    if let Some(name) = controller.force_sensor() {
        let mut force_cfg = config.force_sensor.clone().unwrap_or_default();
        // the simulated cell has no scalar devices to read
        force_cfg.load_cell = None;
        let built = build_capture_engine(name, &force_cfg, &deps).await?;
        deps = deps.with_force_capture(name, built.clone());
        engine = Some(built);
    }

    Ok((deps, engine))
}
