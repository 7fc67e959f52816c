//! Capture engine: background sampling loop plus the capture state machine.
//!
//! All mutable state lives in one [`CaptureCore`] behind a single mutex shared
//! by the sampling loop, the command handlers and the telemetry read. The lock
//! is never held across an `.await`; the force source is read with the lock
//! released and the reading is applied afterwards.

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use super::buffer::SampleBuffer;
use super::command::{metadata_from, CaptureCommand};
use super::{CaptureReadings, CaptureState, CaptureSummary, ForceCapture, TrialMetadata};
use crate::error::{AppResult, KettleError};
use crate::hardware::capabilities::{Commandable, ForceReader};

/// How long `close` waits for the sampling loop before aborting it.
const CLOSE_GRACE: Duration = Duration::from_secs(2);

/// Slowest accepted sampling rate (one reading every 100 s).
pub const MIN_SAMPLE_RATE_HZ: f64 = 0.01;

/// Largest accepted buffer capacity, in samples.
pub const MAX_BUFFER_SIZE: usize = 1_000_000;

/// Tunables for a capture engine.
#[derive(Debug, Clone, PartialEq)]
pub struct CaptureSettings {
    /// Sampling frequency
    pub sample_rate_hz: f64,
    /// Buffer capacity in samples
    pub buffer_size: usize,
    /// A reading strictly above this counts as contact
    pub zero_threshold: f64,
    /// Open captures older than this are forced back to idle
    pub capture_timeout: Duration,
}

impl Default for CaptureSettings {
    fn default() -> Self {
        Self {
            sample_rate_hz: 50.0,
            buffer_size: 1000,
            zero_threshold: 5.0,
            capture_timeout: Duration::from_millis(30_000),
        }
    }
}

impl CaptureSettings {
    /// Check that these settings can drive a sampling loop and return its period.
    pub fn validate(&self) -> AppResult<Duration> {
        if !self.sample_rate_hz.is_finite() || self.sample_rate_hz < MIN_SAMPLE_RATE_HZ {
            return Err(KettleError::Configuration(format!(
                "sample_rate_hz must be at least {MIN_SAMPLE_RATE_HZ}, got {}",
                self.sample_rate_hz
            )));
        }
        let period = Duration::try_from_secs_f64(1.0 / self.sample_rate_hz).map_err(|e| {
            KettleError::Configuration(format!(
                "sample_rate_hz {} has no usable period: {e}",
                self.sample_rate_hz
            ))
        })?;
        if period.is_zero() {
            return Err(KettleError::Configuration(format!(
                "sample_rate_hz {} is too high",
                self.sample_rate_hz
            )));
        }
        if self.buffer_size == 0 || self.buffer_size > MAX_BUFFER_SIZE {
            return Err(KettleError::Configuration(format!(
                "buffer_size must be between 1 and {MAX_BUFFER_SIZE}, got {}",
                self.buffer_size
            )));
        }
        Ok(period)
    }
}

#[derive(Debug)]
struct CaptureCore {
    state: CaptureState,
    buffer: SampleBuffer,
    metadata: Option<TrialMetadata>,
    opened_at: Option<Instant>,
}

impl CaptureCore {
    fn new(buffer_size: usize) -> Self {
        Self {
            state: CaptureState::Idle,
            buffer: SampleBuffer::new(buffer_size),
            metadata: None,
            opened_at: None,
        }
    }

    /// Apply one reading according to the current state.
    fn ingest(&mut self, value: f64, zero_threshold: f64) {
        match self.state {
            CaptureState::Idle => {}
            CaptureState::Waiting => {
                if value > zero_threshold {
                    self.state = CaptureState::Capturing;
                    self.buffer.push(value);
                    debug!(force = value, "contact detected, capturing");
                }
            }
            CaptureState::Capturing => {
                if !self.buffer.push(value) && self.buffer.dropped() == 1 {
                    warn!(
                        capacity = self.buffer.capacity(),
                        "capture buffer full, dropping new samples"
                    );
                }
            }
        }
    }

    /// Force a capture older than `timeout` back to idle.
    fn expire(&mut self, timeout: Duration) -> Option<Option<TrialMetadata>> {
        let opened_at = self.opened_at?;
        if self.state == CaptureState::Idle || opened_at.elapsed() <= timeout {
            return None;
        }
        self.state = CaptureState::Idle;
        self.opened_at = None;
        Some(self.metadata.take())
    }

    fn readings(&self) -> CaptureReadings {
        let (trial_id, cycle_count) = self
            .metadata
            .as_ref()
            .map(|m| (m.trial_id.clone(), m.cycle_count))
            .unwrap_or_default();
        CaptureReadings {
            trial_id,
            cycle_count,
            should_sync: self.state != CaptureState::Idle,
            samples: self.buffer.samples().to_vec(),
            capture_state: self.state,
            max_force: self.buffer.max(),
        }
    }
}

/// Force capture engine.
///
/// Construct with [`CaptureEngine::new`], then call [`CaptureEngine::start`] to
/// launch the sampling loop. [`CaptureEngine::close`] stops it for good.
pub struct CaptureEngine {
    name: String,
    settings: CaptureSettings,
    period: Duration,
    reader: Arc<dyn ForceReader>,
    core: Arc<Mutex<CaptureCore>>,
    shutdown_tx: watch::Sender<bool>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for CaptureEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CaptureEngine")
            .field("name", &self.name)
            .field("settings", &self.settings)
            .field("reader", &"<Arc<dyn ForceReader>>")
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl CaptureEngine {
    /// Create an idle engine. Fails if the settings cannot drive a sampling loop.
    pub fn new(
        name: impl Into<String>,
        settings: CaptureSettings,
        reader: Arc<dyn ForceReader>,
    ) -> AppResult<Self> {
        let period = settings.validate()?;
        let (shutdown_tx, _) = watch::channel(false);
        Ok(Self {
            name: name.into(),
            core: Arc::new(Mutex::new(CaptureCore::new(settings.buffer_size))),
            settings,
            period,
            reader,
            shutdown_tx,
            task: Mutex::new(None),
        })
    }

    /// Launch the sampling loop. Calling it again while the loop runs is a no-op.
    pub fn start(&self) {
        let mut task = self.task.lock();
        if task.as_ref().is_some_and(|h| !h.is_finished()) {
            return;
        }

        let loop_ctx = SamplingLoop {
            name: self.name.clone(),
            period: self.period,
            zero_threshold: self.settings.zero_threshold,
            capture_timeout: self.settings.capture_timeout,
            reader: Arc::clone(&self.reader),
            core: Arc::clone(&self.core),
            shutdown: self.shutdown_tx.subscribe(),
        };
        *task = Some(tokio::spawn(loop_ctx.run()));

        info!(
            engine = %self.name,
            sample_rate_hz = self.settings.sample_rate_hz,
            buffer_size = self.settings.buffer_size,
            "capture engine started"
        );
    }

    /// Stop the sampling loop and wait for it to exit.
    pub async fn close(&self) {
        let _ = self.shutdown_tx.send(true);
        let handle = self.task.lock().take();
        if let Some(mut handle) = handle {
            if tokio::time::timeout(CLOSE_GRACE, &mut handle).await.is_err() {
                warn!(engine = %self.name, "sampling loop did not stop in time, aborting");
                handle.abort();
            }
        }
        info!(engine = %self.name, "capture engine closed");
    }

    /// Engine name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Current capture state.
    pub fn state(&self) -> CaptureState {
        self.core.lock().state
    }

    /// Telemetry snapshot.
    pub fn snapshot(&self) -> CaptureReadings {
        self.core.lock().readings()
    }

    async fn handle(&self, command: CaptureCommand) -> AppResult<Value> {
        match command {
            CaptureCommand::StartCapture {
                trial_id,
                cycle_count,
            } => {
                self.start_capture(metadata_from(trial_id, cycle_count))
                    .await?;
                Ok(json!({ "status": CaptureState::Waiting }))
            }
            CaptureCommand::EndCapture => Ok(serde_json::to_value(self.end_capture().await?)?),
        }
    }
}

#[async_trait]
impl ForceCapture for CaptureEngine {
    async fn start_capture(&self, metadata: Option<TrialMetadata>) -> AppResult<()> {
        {
            let mut core = self.core.lock();
            if core.state != CaptureState::Idle {
                return Err(KettleError::AlreadyCapturing(core.state.to_string()));
            }
            core.buffer.clear();
            core.metadata = metadata;
            core.state = CaptureState::Waiting;
            core.opened_at = Some(Instant::now());

            let (trial_id, cycle_count) = core
                .metadata
                .as_ref()
                .map(|m| (m.trial_id.as_str(), m.cycle_count))
                .unwrap_or_default();
            info!(engine = %self.name, trial_id, cycle_count, "capture armed");
            // hints are issued under the lock so they land in state order
            self.reader.capture_hint(true);
        }
        Ok(())
    }

    async fn end_capture(&self) -> AppResult<CaptureSummary> {
        let summary = {
            let mut core = self.core.lock();
            if core.state == CaptureState::Idle {
                return Err(KettleError::NoActiveCapture);
            }
            let metadata = core.metadata.take().unwrap_or_default();
            let summary = CaptureSummary {
                trial_id: metadata.trial_id,
                cycle_count: metadata.cycle_count,
                sample_count: core.buffer.len(),
                max_force: core.buffer.max(),
            };
            let dropped = core.buffer.dropped();
            core.state = CaptureState::Idle;
            core.opened_at = None;

            info!(
                engine = %self.name,
                trial_id = %summary.trial_id,
                cycle_count = summary.cycle_count,
                sample_count = summary.sample_count,
                max_force = ?summary.max_force,
                dropped,
                "capture ended"
            );
            self.reader.capture_hint(false);
            summary
        };
        Ok(summary)
    }
}

#[async_trait]
impl Commandable for CaptureEngine {
    async fn do_command(&self, request: Value) -> AppResult<Value> {
        let command = CaptureCommand::from_request(request)?;
        self.handle(command).await
    }

    fn readings(&self) -> Value {
        serde_json::to_value(self.snapshot()).unwrap_or_default()
    }
}

/// Everything the sampling task owns.
struct SamplingLoop {
    name: String,
    period: Duration,
    zero_threshold: f64,
    capture_timeout: Duration,
    reader: Arc<dyn ForceReader>,
    core: Arc<Mutex<CaptureCore>>,
    shutdown: watch::Receiver<bool>,
}

impl SamplingLoop {
    async fn run(mut self) {
        if *self.shutdown.borrow() {
            return;
        }
        let mut ticker = tokio::time::interval(self.period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut failure_streak: u64 = 0;

        debug!(engine = %self.name, period_ms = self.period.as_millis(), "sampling loop running");

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                changed = self.shutdown.changed() => {
                    if changed.is_err() || *self.shutdown.borrow() {
                        break;
                    }
                    continue;
                }
            }

            {
                let mut core = self.core.lock();
                if let Some(metadata) = core.expire(self.capture_timeout) {
                    self.reader.capture_hint(false);
                    let metadata = metadata.unwrap_or_default();
                    warn!(
                        engine = %self.name,
                        trial_id = %metadata.trial_id,
                        cycle_count = metadata.cycle_count,
                        timeout_ms = self.capture_timeout.as_millis(),
                        "capture timed out, returning to idle"
                    );
                }
            }

            match self.reader.read_force().await {
                Ok(value) => {
                    if failure_streak > 0 {
                        info!(engine = %self.name, failures = failure_streak, "force reads recovered");
                        failure_streak = 0;
                    }
                    self.core.lock().ingest(value, self.zero_threshold);
                }
                Err(e) => {
                    failure_streak += 1;
                    if failure_streak == 1 {
                        warn!(engine = %self.name, error = %format!("{e:#}"), "failed to read force");
                    } else {
                        debug!(engine = %self.name, error = %e, streak = failure_streak, "force read still failing");
                    }
                }
            }
        }

        debug!(engine = %self.name, "sampling loop stopped");
    }
}
