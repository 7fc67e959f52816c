//! Fault injection for simulated devices.
//!
//! Every mock checks its `FaultConfig` at the top of each operation, so tests
//! can make a camera fail its upload, a switch refuse to move, or a force
//! source go dark after N reads without writing a dedicated test double.

use anyhow::anyhow;
use parking_lot::Mutex;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use std::collections::HashMap;
use std::sync::Arc;

/// Specific fault scenarios.
#[derive(Debug, Clone)]
pub enum Fault {
    /// Every call to `operation` fails
    Always {
        /// Operation name, e.g. `"read_force"`
        operation: &'static str,
    },
    /// `operation` succeeds `count` times, then fails forever
    FailAfterN {
        /// Operation name
        operation: &'static str,
        /// Number of successful calls before failing
        count: u32,
    },
    /// First call of any operation drops the link; all later calls fail
    CommunicationLoss,
}

#[derive(Default, Debug)]
struct FaultState {
    operation_counts: HashMap<&'static str, u32>,
    communication_lost: bool,
}

/// Seeded RNG shared by the mocks for noise and random failures.
pub struct MockRng {
    inner: Mutex<ChaCha8Rng>,
}

impl MockRng {
    /// Seeded RNG when `seed` is set, OS entropy otherwise.
    pub fn new(seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(s) => ChaCha8Rng::seed_from_u64(s),
            None => ChaCha8Rng::from_entropy(),
        };
        Self {
            inner: Mutex::new(rng),
        }
    }

    /// True with probability `rate`.
    pub fn should_fail(&self, rate: f64) -> bool {
        if rate <= 0.0 {
            return false;
        }
        if rate >= 1.0 {
            return true;
        }
        self.inner.lock().gen::<f64>() < rate
    }

    /// Uniform sample from `range`.
    pub fn gen_range<T, R>(&self, range: R) -> T
    where
        T: rand::distributions::uniform::SampleUniform,
        R: rand::distributions::uniform::SampleRange<T>,
    {
        self.inner.lock().gen_range(range)
    }
}

impl Default for MockRng {
    fn default() -> Self {
        Self::new(None)
    }
}

impl std::fmt::Debug for MockRng {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockRng")
            .field("inner", &"<Mutex<ChaCha8Rng>>")
            .finish()
    }
}

/// Fault injection configuration for a simulated device.
///
/// Cloning shares the underlying counters, so a test can keep a handle and
/// call [`FaultConfig::reset`] on a device it already handed out.
#[derive(Clone, Debug)]
pub struct FaultConfig {
    faults: Arc<Vec<Fault>>,
    failure_rate: f64,
    rng: Arc<MockRng>,
    state: Arc<Mutex<FaultState>>,
}

impl FaultConfig {
    /// No faults.
    pub fn none() -> Self {
        Self::faults(Vec::new())
    }

    /// A single fault scenario.
    pub fn fault(fault: Fault) -> Self {
        Self::faults(vec![fault])
    }

    /// Several fault scenarios, checked in order.
    pub fn faults(faults: Vec<Fault>) -> Self {
        Self {
            faults: Arc::new(faults),
            failure_rate: 0.0,
            rng: Arc::new(MockRng::new(None)),
            state: Arc::new(Mutex::new(FaultState::default())),
        }
    }

    /// Fail any operation with probability `rate`, reproducibly when seeded.
    pub fn random_failures(rate: f64, seed: Option<u64>) -> Self {
        Self {
            failure_rate: rate,
            rng: Arc::new(MockRng::new(seed)),
            ..Self::none()
        }
    }

    /// Fail every call to `operation`.
    pub fn always(operation: &'static str) -> Self {
        Self::fault(Fault::Always { operation })
    }

    /// Check whether `operation` on `device` should fail.
    pub fn check(&self, device: &str, operation: &'static str) -> anyhow::Result<()> {
        let mut state = self.state.lock();

        if state.communication_lost {
            return Err(anyhow!("{device}: communication lost"));
        }

        for fault in self.faults.iter() {
            match fault {
                Fault::Always { operation: op } if *op == operation => {
                    return Err(anyhow!("{device}: injected failure on '{operation}'"));
                }
                Fault::FailAfterN {
                    operation: op,
                    count,
                } if *op == operation => {
                    let current = state.operation_counts.entry(operation).or_insert(0);
                    *current += 1;
                    if *current > *count {
                        return Err(anyhow!(
                            "{device}: injected failure on '{operation}' after {count} calls"
                        ));
                    }
                }
                Fault::CommunicationLoss => {
                    state.communication_lost = true;
                    return Err(anyhow!("{device}: communication lost"));
                }
                _ => {}
            }
        }

        if self.rng.should_fail(self.failure_rate) {
            return Err(anyhow!("{device}: random failure on '{operation}'"));
        }

        Ok(())
    }

    /// Clear counters and restore communication.
    pub fn reset(&self) {
        *self.state.lock() = FaultState::default();
    }
}

impl Default for FaultConfig {
    fn default() -> Self {
        Self::none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn none_never_fails() {
        let faults = FaultConfig::none();
        for _ in 0..100 {
            assert!(faults.check("dev", "read_force").is_ok());
        }
    }

    #[test]
    fn always_only_hits_named_operation() {
        let faults = FaultConfig::always("set_position");
        assert!(faults.check("switch", "set_position").is_err());
        assert!(faults.check("switch", "is_moving").is_ok());
    }

    #[test]
    fn fail_after_n_then_reset() {
        let faults = FaultConfig::fault(Fault::FailAfterN {
            operation: "read_force",
            count: 2,
        });

        assert!(faults.check("dev", "read_force").is_ok());
        assert!(faults.check("dev", "read_force").is_ok());
        assert!(faults.check("dev", "read_force").is_err());

        faults.reset();
        assert!(faults.check("dev", "read_force").is_ok());
    }

    #[test]
    fn communication_loss_is_sticky() {
        let faults = FaultConfig::fault(Fault::CommunicationLoss);
        let err = faults.check("cam", "capture_image").unwrap_err();
        assert!(err.to_string().contains("communication lost"));
        assert!(faults.check("cam", "anything").is_err());
    }

    #[test]
    fn seeded_random_failures_are_roughly_proportional() {
        let faults = FaultConfig::random_failures(0.5, Some(42));
        let failures = (0..1000)
            .filter(|_| faults.check("dev", "read_force").is_err())
            .count();
        assert!(failures > 400 && failures < 600, "got {failures} failures");
    }

    #[test]
    fn clones_share_state() {
        let faults = FaultConfig::fault(Fault::CommunicationLoss);
        let handle = faults.clone();
        assert!(faults.check("dev", "op").is_err());
        assert!(handle.check("dev", "op").is_err());
        handle.reset();
        assert!(faults.check("dev", "op").is_err()); // scenario re-triggers on first call
    }
}
