//! Trial orchestrator commands.

use serde::Deserialize;
use serde_json::Value;

use crate::command::decode;
use crate::error::AppResult;

/// Requests understood by the trial orchestrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum TrialCommand {
    /// Begin a trial and its background cycle loop
    Start,
    /// End the active trial
    Stop,
    /// Report trial status
    Status,
    /// Run one cycle synchronously
    ExecuteCycle,
}

impl TrialCommand {
    /// Command names accepted on the wire.
    pub const NAMES: &'static [&'static str] = &["start", "stop", "status", "execute_cycle"];

    /// Decode a raw request.
    pub fn from_request(request: Value) -> AppResult<Self> {
        decode(request, Self::NAMES)
    }
}
