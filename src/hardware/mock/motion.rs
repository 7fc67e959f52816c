//! Simulated arm and saved-pose switches.
//!
//! A [`MockSwitch`] bound to a [`MockArm`] puts the arm in motion for the arm's
//! configured motion time whenever the switch is set to its active position.
//! Time is measured with `tokio::time::Instant`, so tests running with a paused
//! clock see deterministic motion.

use anyhow::Result;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

use super::faults::FaultConfig;
use crate::hardware::capabilities::{
    Actuator, PositionSwitch, SwitchOptions, ACTIVE_POSITION,
};

/// Default time a simulated move takes.
pub const DEFAULT_MOTION_TIME: Duration = Duration::from_millis(200);

// =============================================================================
// MockArm
// =============================================================================

/// Simulated arm that is "moving" for a fixed time after each motion request.
#[derive(Debug)]
pub struct MockArm {
    name: String,
    motion_time: Duration,
    moving_until: Mutex<Option<Instant>>,
    faults: FaultConfig,
}

impl MockArm {
    /// Arm with the given motion time and no faults.
    pub fn new(motion_time: Duration) -> Self {
        Self::with_faults("mock-arm", motion_time, FaultConfig::none())
    }

    /// Arm with a name and fault injection.
    pub fn with_faults(name: impl Into<String>, motion_time: Duration, faults: FaultConfig) -> Self {
        Self {
            name: name.into(),
            motion_time,
            moving_until: Mutex::new(None),
            faults,
        }
    }

    /// Begin a simulated move.
    pub fn start_motion(&self) {
        *self.moving_until.lock() = Some(Instant::now() + self.motion_time);
    }
}

impl Default for MockArm {
    fn default() -> Self {
        Self::new(DEFAULT_MOTION_TIME)
    }
}

#[async_trait]
impl Actuator for MockArm {
    async fn is_moving(&self) -> Result<bool> {
        self.faults.check(&self.name, "is_moving")?;
        let mut until = self.moving_until.lock();
        match *until {
            Some(deadline) if Instant::now() < deadline => Ok(true),
            Some(_) => {
                *until = None;
                Ok(false)
            }
            None => Ok(false),
        }
    }
}

// =============================================================================
// MockSwitch
// =============================================================================

/// Simulated saved-pose switch.
#[derive(Debug)]
pub struct MockSwitch {
    name: String,
    arm: Option<Arc<MockArm>>,
    positions: Mutex<Vec<u32>>,
    faults: FaultConfig,
}

impl MockSwitch {
    /// Switch that moves `arm` when set to the active position.
    pub fn new(name: impl Into<String>, arm: Arc<MockArm>) -> Self {
        Self {
            name: name.into(),
            arm: Some(arm),
            positions: Mutex::new(Vec::new()),
            faults: FaultConfig::none(),
        }
    }

    /// Switch not attached to any arm.
    pub fn detached(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            arm: None,
            positions: Mutex::new(Vec::new()),
            faults: FaultConfig::none(),
        }
    }

    /// Attach fault injection.
    #[must_use]
    pub fn with_faults(mut self, faults: FaultConfig) -> Self {
        self.faults = faults;
        self
    }

    /// Every position commanded so far, in order.
    pub fn positions(&self) -> Vec<u32> {
        self.positions.lock().clone()
    }

    /// Number of times the switch was set to its active position.
    pub fn activations(&self) -> usize {
        self.positions
            .lock()
            .iter()
            .filter(|p| **p == ACTIVE_POSITION)
            .count()
    }
}

#[async_trait]
impl PositionSwitch for MockSwitch {
    async fn set_position(&self, position: u32, _options: Option<SwitchOptions>) -> Result<()> {
        self.faults.check(&self.name, "set_position")?;
        self.positions.lock().push(position);
        if position == ACTIVE_POSITION {
            if let Some(arm) = &self.arm {
                arm.start_motion();
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn arm_moves_for_motion_time() {
        let arm = Arc::new(MockArm::new(Duration::from_millis(100)));
        let switch = MockSwitch::new("pour-prep", arm.clone());

        assert!(!arm.is_moving().await.unwrap());
        switch.set_position(ACTIVE_POSITION, None).await.unwrap();
        assert!(arm.is_moving().await.unwrap());

        tokio::time::advance(Duration::from_millis(150)).await;
        assert!(!arm.is_moving().await.unwrap());
    }

    #[tokio::test]
    async fn inactive_position_does_not_move_arm() {
        let arm = Arc::new(MockArm::new(Duration::from_secs(5)));
        let switch = MockSwitch::new("resting", arm.clone());

        switch.set_position(1, None).await.unwrap();
        assert!(!arm.is_moving().await.unwrap());
        assert_eq!(switch.positions(), vec![1]);
        assert_eq!(switch.activations(), 0);
    }

    #[tokio::test]
    async fn failing_switch_records_nothing() {
        let switch =
            MockSwitch::detached("resting").with_faults(FaultConfig::always("set_position"));
        let err = switch.set_position(ACTIVE_POSITION, None).await.unwrap_err();
        assert!(err.to_string().contains("resting"));
        assert!(switch.positions().is_empty());
    }

    #[tokio::test]
    async fn arm_poll_faults_propagate() {
        let arm = MockArm::with_faults(
            "flaky-arm",
            Duration::ZERO,
            FaultConfig::always("is_moving"),
        );
        assert!(arm.is_moving().await.is_err());
    }
}
