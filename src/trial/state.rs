//! Trial bookkeeping: the active trial record, id generation and the status
//! shape reported to callers.

use chrono::{DateTime, Local, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use crate::capture::TrialMetadata;

/// Orchestrator phase as reported by `status`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrialPhase {
    /// No trial active
    Idle,
    /// A trial is active and its cycle loop is running
    Running,
}

impl std::fmt::Display for TrialPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TrialPhase::Idle => write!(f, "idle"),
            TrialPhase::Running => write!(f, "running"),
        }
    }
}

/// The active trial. Exists from `start` until `stop`.
#[derive(Debug)]
pub struct TrialState {
    /// Unique trial identifier
    pub trial_id: String,
    /// Cycles begun under this trial
    pub cycle_count: u64,
    /// When the trial started
    pub started_at: DateTime<Utc>,
    /// When the most recent cycle finished its motion
    pub last_cycle_at: Option<DateTime<Utc>>,
    stop_tx: watch::Sender<bool>,
}

impl TrialState {
    /// New trial with its stop signal. The receiver goes to the cycle loop.
    pub fn new(trial_id: String) -> (Self, watch::Receiver<bool>) {
        let (stop_tx, stop_rx) = watch::channel(false);
        (
            Self {
                trial_id,
                cycle_count: 0,
                started_at: Utc::now(),
                last_cycle_at: None,
                stop_tx,
            },
            stop_rx,
        )
    }

    /// Begin a cycle: bump the counter and return the labels for this cycle.
    pub fn begin_cycle(&mut self) -> TrialMetadata {
        self.cycle_count += 1;
        TrialMetadata {
            trial_id: self.trial_id.clone(),
            cycle_count: self.cycle_count,
        }
    }

    /// Tell the cycle loop to exit at its next iteration boundary.
    pub fn signal_stop(&self) {
        let _ = self.stop_tx.send(true);
    }
}

/// Status snapshot returned by `status` and the telemetry read.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrialStatus {
    /// `idle` or `running`
    pub state: TrialPhase,
    /// Active trial id, `""` when idle
    pub trial_id: String,
    /// Cycles begun under the active trial, `0` when idle
    pub cycle_count: u64,
    /// RFC 3339 timestamp of the last cycle, `""` if none
    pub last_cycle_at: String,
    /// True only while running
    pub should_sync: bool,
}

impl TrialStatus {
    /// Status for an optional active trial.
    pub fn of(trial: Option<&TrialState>) -> Self {
        match trial {
            Some(t) => Self {
                state: TrialPhase::Running,
                trial_id: t.trial_id.clone(),
                cycle_count: t.cycle_count,
                last_cycle_at: t
                    .last_cycle_at
                    .map(|at| at.to_rfc3339())
                    .unwrap_or_default(),
                should_sync: true,
            },
            None => Self {
                state: TrialPhase::Idle,
                trial_id: String::new(),
                cycle_count: 0,
                last_cycle_at: String::new(),
                should_sync: false,
            },
        }
    }
}

/// Generates `trial-YYYYMMDD-HHMMSS` ids in local time.
///
/// Two trials started within the same second get `-2`, `-3`, ... suffixes. If
/// the wall clock steps back, ids keep extending the last issued base until
/// the clock passes it again.
#[derive(Debug, Default)]
pub struct TrialIdGenerator {
    last: Option<(DateTime<Local>, String)>,
    repeats: u32,
}

impl TrialIdGenerator {
    /// Next id for the current wall-clock time.
    pub fn next_id(&mut self) -> String {
        self.next_at(Local::now())
    }

    /// Next id for `now`.
    pub fn next_at(&mut self, now: DateTime<Local>) -> String {
        let now = now.trunc_subsecs(0);
        match &self.last {
            Some((last, base)) if now <= *last => {
                self.repeats += 1;
                format!("{base}-{}", self.repeats + 1)
            }
            _ => {
                let base = format!("trial-{}", now.format("%Y%m%d-%H%M%S"));
                self.last = Some((now, base.clone()));
                self.repeats = 0;
                base
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn ids_follow_timestamp_format() {
        let mut ids = TrialIdGenerator::default();
        let at = Local.with_ymd_and_hms(2026, 1, 20, 14, 0, 0).unwrap();
        assert_eq!(ids.next_at(at), "trial-20260120-140000");
    }

    #[test]
    fn same_second_gets_suffix() {
        let mut ids = TrialIdGenerator::default();
        let at = Local.with_ymd_and_hms(2026, 1, 20, 14, 0, 0).unwrap();
        let later = Local.with_ymd_and_hms(2026, 1, 20, 14, 0, 1).unwrap();

        assert_eq!(ids.next_at(at), "trial-20260120-140000");
        assert_eq!(ids.next_at(at), "trial-20260120-140000-2");
        assert_eq!(ids.next_at(at), "trial-20260120-140000-3");
        assert_eq!(ids.next_at(later), "trial-20260120-140001");
    }

    #[test]
    fn clock_stepping_back_never_repeats_an_id() {
        let mut ids = TrialIdGenerator::default();
        let first = Local.with_ymd_and_hms(2026, 1, 20, 14, 0, 0).unwrap();
        let second = Local.with_ymd_and_hms(2026, 1, 20, 14, 0, 1).unwrap();
        let later = Local.with_ymd_and_hms(2026, 1, 20, 14, 0, 2).unwrap();

        let issued = [
            ids.next_at(first),
            ids.next_at(second),
            ids.next_at(first),
            ids.next_at(first),
            ids.next_at(later),
        ];
        assert_eq!(
            issued,
            [
                "trial-20260120-140000",
                "trial-20260120-140001",
                "trial-20260120-140001-2",
                "trial-20260120-140001-3",
                "trial-20260120-140002",
            ]
        );
    }

    #[test]
    fn subsecond_calls_share_a_base() {
        let mut ids = TrialIdGenerator::default();
        let at = Local.with_ymd_and_hms(2026, 1, 20, 14, 0, 0).unwrap();
        assert_eq!(ids.next_at(at + chrono::Duration::milliseconds(900)), "trial-20260120-140000");
        assert_eq!(ids.next_at(at + chrono::Duration::milliseconds(100)), "trial-20260120-140000-2");
    }

    #[test]
    fn begin_cycle_increments_once() {
        let (mut trial, _rx) = TrialState::new("trial-1".into());
        let meta = trial.begin_cycle();
        assert_eq!(meta.cycle_count, 1);
        assert_eq!(trial.cycle_count, 1);
        assert_eq!(meta.trial_id, "trial-1");
    }

    #[test]
    fn stop_signal_reaches_receiver() {
        let (trial, rx) = TrialState::new("trial-1".into());
        assert!(!*rx.borrow());
        trial.signal_stop();
        assert!(*rx.borrow());
    }

    #[test]
    fn idle_and_running_status() {
        let idle = TrialStatus::of(None);
        assert_eq!(idle.state, TrialPhase::Idle);
        assert_eq!(idle.last_cycle_at, "");
        assert!(!idle.should_sync);

        let (mut trial, _rx) = TrialState::new("trial-2".into());
        trial.begin_cycle();
        trial.last_cycle_at = Some(Utc.with_ymd_and_hms(2026, 1, 20, 14, 0, 0).unwrap());
        let running = TrialStatus::of(Some(&trial));
        assert_eq!(running.state, TrialPhase::Running);
        assert_eq!(running.cycle_count, 1);
        assert_eq!(running.last_cycle_at, "2026-01-20T14:00:00+00:00");
        assert!(running.should_sync);
    }
}
