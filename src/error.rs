//! Custom error types for the kettle cycle rig.
//!
//! `KettleError` is the single error type returned by the capture engine, the
//! trial orchestrator, the configuration layer and the composition root.
//!
//! ## Error Hierarchy
//!
//! - **Configuration** (`Config`, `Configuration`, `Credentials`,
//!   `MissingDependency`): fatal at construction, the component is never built.
//! - **State conflicts** (`AlreadyCapturing`, `NoActiveCapture`,
//!   `TrialAlreadyRunning`, `NoActiveTrial`): returned to the caller that issued
//!   the offending command. Rejection never changes internal state.
//! - **Request decoding** (`InvalidRequest`, `UnknownCommand`): raised at the
//!   command boundary before any state is touched.
//! - **Cycle failures** (`Hardware`, `Vision`): abort the current cycle only.
//!   The background cycle loop logs them and moves on to the next iteration.
//! - **`Cancelled`**: the process-wide shutdown fired while a cycle was waiting.
//!
//! Collaborator traits return `anyhow::Result`, like the hardware capability
//! traits they are modeled on. The core attaches context when it converts those
//! into `Hardware`/`Vision` so the message identifies the step that failed.

use thiserror::Error;

/// Convenience alias for results using the crate error type.
pub type AppResult<T> = std::result::Result<T, KettleError>;

/// Primary error type for the kettle cycle rig.
#[derive(Error, Debug)]
pub enum KettleError {
    /// Configuration file parsing or extraction failed.
    ///
    /// **Error Type**: Permanent - requires fixing the configuration file.
    #[error("Configuration error: {0}")]
    Config(Box<figment::Error>),

    /// Configuration parsed but failed semantic validation.
    ///
    /// Carries the config path prefix, e.g. `controller: arm is required`.
    #[error("Configuration validation error: {0}")]
    Configuration(String),

    /// The data-upload credentials file is missing, unreadable or incomplete.
    #[error("credentials error: {0}")]
    Credentials(String),

    /// A named collaborator was not present in the dependency set.
    #[error("getting {role}: '{name}' not found in dependencies")]
    MissingDependency {
        /// Collaborator role (arm, switch, camera, ...)
        role: &'static str,
        /// Configured resource name
        name: String,
    },

    /// Standard I/O operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON encoding of a response or credentials file failed.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// `start_capture` issued while a capture is waiting or capturing.
    #[error("capture already in progress (state: {0})")]
    AlreadyCapturing(String),

    /// `end_capture` issued while the engine is idle.
    #[error("no active capture to end")]
    NoActiveCapture,

    /// `start` issued while a trial is active.
    #[error("trial already running: {0}")]
    TrialAlreadyRunning(String),

    /// `stop` issued while no trial is active.
    #[error("no active trial to stop")]
    NoActiveTrial,

    /// The request named a command this component does not know.
    #[error("unknown command: {0}")]
    UnknownCommand(String),

    /// The request was malformed (missing `command`, bad field types).
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Motion or switch command failed during a cycle.
    #[error("{0}")]
    Hardware(String),

    /// Image capture or upload failed during a cycle.
    #[error("capturing image: {0}")]
    Vision(String),

    /// Shutdown was requested while the operation was in progress.
    #[error("operation cancelled by shutdown")]
    Cancelled,
}

impl KettleError {
    /// Wrap a collaborator failure with the name of the step that failed.
    pub fn hardware(context: &str, err: anyhow::Error) -> Self {
        KettleError::Hardware(format!("{context}: {err:#}"))
    }

    /// Whether the error is a rejected command that left state untouched.
    #[must_use]
    pub fn is_state_conflict(&self) -> bool {
        matches!(
            self,
            KettleError::AlreadyCapturing(_)
                | KettleError::NoActiveCapture
                | KettleError::TrialAlreadyRunning(_)
                | KettleError::NoActiveTrial
        )
    }
}

impl From<figment::Error> for KettleError {
    fn from(value: figment::Error) -> Self {
        KettleError::Config(Box::new(value))
    }
}
