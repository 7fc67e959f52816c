//! Simulated collaborators for running the rig without hardware.
//!
//! Every mock accepts a [`FaultConfig`] so failure paths can be exercised
//! deterministically.

pub mod faults;
pub mod force;
pub mod motion;
pub mod vision;

pub use faults::{Fault, FaultConfig, MockRng};
pub use force::{MockForceReader, MockForceReaderBuilder};
pub use motion::{MockArm, MockSwitch, DEFAULT_MOTION_TIME};
pub use vision::{MockCamera, MockUploader, UploadRecord};
