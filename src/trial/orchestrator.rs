//! Trial orchestrator: cycle sequencing and the background cycle loop.
//!
//! # Cycle
//!
//! ```text
//! bump cycle_count ─► pour-prep switch ─► wait stationary ─► [photo + upload]
//!        ─► [start_capture] ─► resting switch ─► wait stationary
//!        ─► [end_capture] ─► stamp last_cycle_at ─► settle
//! ```
//!
//! Switch failures and vision failures abort the cycle. Motion timeouts and
//! capture start/end failures are logged and the cycle continues.
//!
//! Cycles never overlap: a manual `execute_cycle`, or the loop of a trial
//! started right after `stop`, waits for the cycle in flight to finish.
//!
//! # Cancellation
//!
//! Each trial owns a stop signal checked between cycles; `stop` never
//! interrupts a cycle in flight. The orchestrator-wide shutdown signal set by
//! [`TrialOrchestrator::close`] also interrupts stationary waits and the
//! settle delay.

use async_trait::async_trait;
use chrono::Utc;
use futures::future::join_all;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use super::command::TrialCommand;
use super::state::{TrialIdGenerator, TrialState, TrialStatus};
use crate::capture::{CaptureSummary, ForceCapture};
use crate::error::{AppResult, KettleError};
use crate::hardware::capabilities::{Actuator, Commandable, PositionSwitch, ACTIVE_POSITION};
use crate::vision::ImageUploader;

/// How long `close` waits for cycle loops before aborting them.
const CLOSE_GRACE: Duration = Duration::from_secs(15);

/// Timing policy for one cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CycleTiming {
    /// Interval between `is_moving` polls
    pub poll_interval: Duration,
    /// Give up waiting for the arm after this long
    pub motion_timeout: Duration,
    /// Pause at the end of every cycle
    pub settle: Duration,
}

impl Default for CycleTiming {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(50),
            motion_timeout: Duration::from_secs(10),
            settle: Duration::from_secs(1),
        }
    }
}

/// Result of `execute_cycle`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CycleReport {
    /// Always `"completed"`
    pub status: String,
    /// Capture summary when a force capture ran
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub force_capture: Option<CaptureSummary>,
}

/// Result of `start`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrialStarted {
    /// Id of the new trial
    pub trial_id: String,
}

/// Result of `stop`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrialStopped {
    /// Id of the stopped trial
    pub trial_id: String,
    /// Cycles begun under the trial
    pub cycle_count: u64,
}

/// Which saved pose a move targets.
#[derive(Debug, Clone, Copy)]
enum Pose {
    PourPrep,
    Resting,
}

impl std::fmt::Display for Pose {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Pose::PourPrep => write!(f, "pour-prep"),
            Pose::Resting => write!(f, "resting"),
        }
    }
}

/// Everything a cycle touches. Shared between callers and the cycle loop.
struct CycleRunner {
    arm: Arc<dyn Actuator>,
    resting: Arc<dyn PositionSwitch>,
    pour_prep: Arc<dyn PositionSwitch>,
    force: Option<Arc<dyn ForceCapture>>,
    vision: Option<ImageUploader>,
    timing: CycleTiming,
    trial: Mutex<Option<TrialState>>,
    ids: Mutex<TrialIdGenerator>,
    /// Held for a whole cycle so only one cycle drives the arm at a time.
    cycle_gate: tokio::sync::Mutex<()>,
    shutdown_tx: watch::Sender<bool>,
}

impl CycleRunner {
    async fn execute_cycle(&self) -> AppResult<CycleReport> {
        let _cycle = self.cycle_gate.lock().await;
        if self.is_shut_down() {
            return Err(KettleError::Cancelled);
        }

        let metadata = self.trial.lock().as_mut().map(TrialState::begin_cycle);
        if let Some(meta) = &metadata {
            info!(trial_id = %meta.trial_id, cycle = meta.cycle_count, "starting cycle");
        } else {
            info!("starting standalone cycle");
        }

        self.move_to(Pose::PourPrep).await?;
        self.wait_for_arm_stopped(Pose::PourPrep).await?;

        if let Some(vision) = &self.vision {
            vision.capture_and_upload(metadata.as_ref()).await?;
        }

        let capture = match &self.force {
            Some(force) => match force.start_capture(metadata.clone()).await {
                Ok(()) => Some(force),
                Err(e) => {
                    warn!(error = %e, "failed to start force capture");
                    None
                }
            },
            None => None,
        };

        let returned = match self.move_to(Pose::Resting).await {
            Ok(()) => self.wait_for_arm_stopped(Pose::Resting).await,
            Err(e) => Err(e),
        };
        if let Err(e) = returned {
            if let Some(force) = capture {
                if let Err(cleanup) = force.end_capture().await {
                    warn!(error = %cleanup, "failed to end force capture during cleanup");
                }
            }
            return Err(e);
        }

        let force_capture = match capture {
            Some(force) => match force.end_capture().await {
                Ok(summary) => Some(summary),
                Err(e) => {
                    warn!(error = %e, "failed to end force capture");
                    None
                }
            },
            None => None,
        };

        if let Some(meta) = &metadata {
            if let Some(trial) = self.trial.lock().as_mut() {
                if trial.trial_id == meta.trial_id {
                    trial.last_cycle_at = Some(Utc::now());
                }
            }
        }

        self.pause(self.timing.settle).await?;

        Ok(CycleReport {
            status: "completed".to_string(),
            force_capture,
        })
    }

    async fn move_to(&self, pose: Pose) -> AppResult<()> {
        let switch = match pose {
            Pose::PourPrep => &self.pour_prep,
            Pose::Resting => &self.resting,
        };
        debug!(%pose, "commanding switch");
        switch
            .set_position(ACTIVE_POSITION, None)
            .await
            .map_err(|e| KettleError::hardware(&format!("moving to {pose} position"), e))
    }

    /// Poll until the arm is still. Timeouts and poll errors are logged only;
    /// the single hard failure is shutdown.
    async fn wait_for_arm_stopped(&self, pose: Pose) -> AppResult<()> {
        let mut shutdown = self.shutdown_tx.subscribe();
        if *shutdown.borrow_and_update() {
            return Err(KettleError::Cancelled);
        }

        let deadline = Instant::now() + self.timing.motion_timeout;
        let mut ticker = tokio::time::interval_at(
            Instant::now() + self.timing.poll_interval,
            self.timing.poll_interval,
        );
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown.changed() => return Err(KettleError::Cancelled),
                () = tokio::time::sleep_until(deadline) => {
                    warn!(%pose, timeout_ms = self.timing.motion_timeout.as_millis(), "timeout waiting for arm to stop");
                    return Ok(());
                }
                _ = ticker.tick() => {
                    match self.arm.is_moving().await {
                        Ok(false) => return Ok(()),
                        Ok(true) => {}
                        Err(e) => {
                            warn!(%pose, error = %format!("{e:#}"), "checking arm movement failed");
                            return Ok(());
                        }
                    }
                }
            }
        }
    }

    /// Sleep for `delay` unless shutdown fires first.
    async fn pause(&self, delay: Duration) -> AppResult<()> {
        let mut shutdown = self.shutdown_tx.subscribe();
        if *shutdown.borrow_and_update() {
            return Err(KettleError::Cancelled);
        }
        tokio::select! {
            _ = shutdown.changed() => Err(KettleError::Cancelled),
            () = tokio::time::sleep(delay) => Ok(()),
        }
    }

    fn is_shut_down(&self) -> bool {
        *self.shutdown_tx.borrow()
    }
}

/// Background loop for one trial.
async fn cycle_loop(runner: Arc<CycleRunner>, trial_id: String, mut stop: watch::Receiver<bool>) {
    info!(%trial_id, "cycle loop started");
    loop {
        if *stop.borrow_and_update() || runner.is_shut_down() {
            break;
        }
        match runner.execute_cycle().await {
            Ok(report) => {
                debug!(%trial_id, force_capture = ?report.force_capture, "cycle completed");
            }
            Err(KettleError::Cancelled) => break,
            Err(e) => {
                error!(%trial_id, error = %e, "cycle failed");
                // failed cycles skip the settle delay, so pace the retry with it
                if runner.pause(runner.timing.settle).await.is_err() {
                    break;
                }
            }
        }
    }
    info!(%trial_id, "cycle loop exited");
}

/// Trial orchestrator.
///
/// # Example
///
/// ```rust,ignore
/// let orchestrator = TrialOrchestrator::builder(arm, resting, pour_prep)
///     .force_capture(engine)
///     .build();
/// let started = orchestrator.start()?;
/// // ...
/// let stopped = orchestrator.stop()?;
/// orchestrator.close().await;
/// ```
pub struct TrialOrchestrator {
    runner: Arc<CycleRunner>,
    loops: Mutex<Vec<JoinHandle<()>>>,
}

impl std::fmt::Debug for TrialOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TrialOrchestrator")
            .field("timing", &self.runner.timing)
            .field("force_capture", &self.runner.force.is_some())
            .field("vision", &self.runner.vision)
            .field("status", &self.status())
            .finish_non_exhaustive()
    }
}

impl TrialOrchestrator {
    /// Start building an orchestrator from its required collaborators.
    pub fn builder(
        arm: Arc<dyn Actuator>,
        resting: Arc<dyn PositionSwitch>,
        pour_prep: Arc<dyn PositionSwitch>,
    ) -> TrialOrchestratorBuilder {
        TrialOrchestratorBuilder {
            arm,
            resting,
            pour_prep,
            force: None,
            vision: None,
            timing: CycleTiming::default(),
        }
    }

    /// Begin a trial and launch its cycle loop.
    pub fn start(&self) -> AppResult<TrialStarted> {
        if self.runner.is_shut_down() {
            return Err(KettleError::Cancelled);
        }

        let (trial_id, stop_rx) = {
            let mut trial = self.runner.trial.lock();
            if let Some(active) = trial.as_ref() {
                return Err(KettleError::TrialAlreadyRunning(active.trial_id.clone()));
            }
            let trial_id = self.runner.ids.lock().next_id();
            let (state, stop_rx) = TrialState::new(trial_id.clone());
            *trial = Some(state);
            (trial_id, stop_rx)
        };

        let handle = tokio::spawn(cycle_loop(
            Arc::clone(&self.runner),
            trial_id.clone(),
            stop_rx,
        ));
        let mut loops = self.loops.lock();
        loops.retain(|h| !h.is_finished());
        loops.push(handle);

        info!(%trial_id, "trial started");
        Ok(TrialStarted { trial_id })
    }

    /// End the active trial. The cycle in flight, if any, runs to completion.
    pub fn stop(&self) -> AppResult<TrialStopped> {
        let trial = self
            .runner
            .trial
            .lock()
            .take()
            .ok_or(KettleError::NoActiveTrial)?;
        trial.signal_stop();

        info!(
            trial_id = %trial.trial_id,
            cycles = trial.cycle_count,
            elapsed_s = (Utc::now() - trial.started_at).num_seconds(),
            "trial stopped"
        );
        Ok(TrialStopped {
            trial_id: trial.trial_id,
            cycle_count: trial.cycle_count,
        })
    }

    /// Current trial status.
    pub fn status(&self) -> TrialStatus {
        TrialStatus::of(self.runner.trial.lock().as_ref())
    }

    /// Run one cycle now, under the active trial if there is one.
    pub async fn execute_cycle(&self) -> AppResult<CycleReport> {
        self.runner.execute_cycle().await
    }

    /// Trigger shutdown, drop any active trial and wait for cycle loops to exit.
    pub async fn close(&self) {
        let _ = self.runner.shutdown_tx.send(true);
        if let Some(trial) = self.runner.trial.lock().take() {
            trial.signal_stop();
        }

        let loops: Vec<_> = std::mem::take(&mut *self.loops.lock());
        join_all(loops.into_iter().map(|mut handle| async move {
            if tokio::time::timeout(CLOSE_GRACE, &mut handle).await.is_err() {
                warn!("cycle loop did not stop in time, aborting");
                handle.abort();
            }
        }))
        .await;
        info!("trial orchestrator closed");
    }

    async fn handle(&self, command: TrialCommand) -> AppResult<Value> {
        let value = match command {
            TrialCommand::Start => serde_json::to_value(self.start()?)?,
            TrialCommand::Stop => serde_json::to_value(self.stop()?)?,
            TrialCommand::Status => serde_json::to_value(self.status())?,
            TrialCommand::ExecuteCycle => serde_json::to_value(self.execute_cycle().await?)?,
        };
        Ok(value)
    }
}

#[async_trait]
impl Commandable for TrialOrchestrator {
    async fn do_command(&self, request: Value) -> AppResult<Value> {
        let command = TrialCommand::from_request(request)?;
        self.handle(command).await
    }

    fn readings(&self) -> Value {
        serde_json::to_value(self.status()).unwrap_or_default()
    }
}

/// Builder for [`TrialOrchestrator`].
pub struct TrialOrchestratorBuilder {
    arm: Arc<dyn Actuator>,
    resting: Arc<dyn PositionSwitch>,
    pour_prep: Arc<dyn PositionSwitch>,
    force: Option<Arc<dyn ForceCapture>>,
    vision: Option<ImageUploader>,
    timing: CycleTiming,
}

impl TrialOrchestratorBuilder {
    /// Bracket each cycle with a force capture
    pub fn force_capture(mut self, force: Arc<dyn ForceCapture>) -> Self {
        self.force = Some(force);
        self
    }

    /// Photograph and upload after reaching pour-prep
    pub fn vision(mut self, vision: ImageUploader) -> Self {
        self.vision = Some(vision);
        self
    }

    /// Override the cycle timing policy
    pub fn timing(mut self, timing: CycleTiming) -> Self {
        self.timing = timing;
        self
    }

    /// Build the orchestrator
    pub fn build(self) -> TrialOrchestrator {
        let (shutdown_tx, _) = watch::channel(false);
        TrialOrchestrator {
            runner: Arc::new(CycleRunner {
                arm: self.arm,
                resting: self.resting,
                pour_prep: self.pour_prep,
                force: self.force,
                vision: self.vision,
                timing: self.timing,
                trial: Mutex::new(None),
                ids: Mutex::new(TrialIdGenerator::default()),
                cycle_gate: tokio::sync::Mutex::new(()),
                shutdown_tx,
            }),
            loops: Mutex::new(Vec::new()),
        }
    }
}
