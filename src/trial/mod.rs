//! Trial orchestration.
//!
//! A trial is a named run of repeated cycles. The [`TrialOrchestrator`] owns at
//! most one active [`TrialState`], runs its cycles in a background task and
//! reports progress through [`TrialStatus`].

pub mod command;
pub mod orchestrator;
pub mod state;

pub use command::TrialCommand;
pub use orchestrator::{
    CycleReport, CycleTiming, TrialOrchestrator, TrialOrchestratorBuilder, TrialStarted,
    TrialStopped,
};
pub use state::{TrialIdGenerator, TrialPhase, TrialState, TrialStatus};
