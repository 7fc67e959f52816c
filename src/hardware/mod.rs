//! Hardware Collaborators
//!
//! Capability traits for every device and service the rig talks to, a
//! load-cell adapter, and simulated implementations of each role.
//!
//! # Simulated Devices
//!
//! - [`mock::MockArm`] / [`mock::MockSwitch`] - arm that moves for a fixed time
//!   after a switch activation
//! - [`mock::MockForceReader`] - noise floor plus a contact ramp
//! - [`mock::MockCamera`] / [`mock::MockUploader`] - fixed JPEG payload and a
//!   recording upload client

pub mod capabilities;
pub mod load_cell;
pub mod mock;

pub use capabilities::{
    Actuator, Camera, Commandable, ForceReader, ImageMetadata, MimeType, PositionSwitch,
    Readable, SwitchOptions, UploadClient, UploadOptions, ACTIVE_POSITION,
};
pub use load_cell::LoadCellReader;
