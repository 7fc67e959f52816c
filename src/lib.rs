//! # Kettle Cycle Core Library
//!
//! Automation for a repetitive kettle pour test on a robot arm. Each cycle moves
//! the arm to a pour-prep pose, optionally photographs the result, returns to
//! rest, and records the contact force while it does so. Repeated cycles are
//! grouped into named trials whose progress external callers can poll.
//!
//! ## Crate Structure
//!
//! - **`capture`**: The `CaptureEngine`, a fixed-rate force sampling loop with an
//!   idle/waiting/capturing state machine and a bounded sample buffer.
//! - **`trial`**: The `TrialOrchestrator`, which sequences one cycle, runs cycles
//!   in a background loop per trial, and reports status.
//! - **`hardware`**: Capability traits for every collaborator (arm, switches,
//!   force source, camera, upload client), a load-cell adapter, and simulated
//!   implementations of each.
//! - **`vision`**: Photograph-and-upload step with trial tagging.
//! - **`command`**: Decoding of `{command: ...}` requests into typed commands.
//! - **`config`**: Figment-based configuration loading and validation.
//! - **`credentials`**: Upload API credentials file.
//! - **`factory`**: Named dependency sets and the `build_*` constructors.
//! - **`logging`**: `tracing-subscriber` initialization.
//! - **`error`**: The crate-wide `KettleError` type.

pub mod capture;
pub mod command;
pub mod config;
pub mod credentials;
pub mod error;
pub mod factory;
pub mod hardware;
pub mod logging;
pub mod trial;
pub mod vision;

pub use capture::{CaptureEngine, CaptureState, ForceCapture};
pub use error::{AppResult, KettleError};
pub use factory::{build_capture_engine, build_orchestrator, Dependencies};
pub use trial::{CycleTiming, TrialOrchestrator};
