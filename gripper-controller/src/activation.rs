use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU8, Ordering};
use std::time::Duration;

/// Startup phase shared by all grippers on the bus.
///
/// Only ever moves forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum DriverPhase {
    Resetting,
    Activating,
    Ready,
}

impl DriverPhase {
    fn as_u8(self) -> u8 {
        match self {
            DriverPhase::Resetting => 0,
            DriverPhase::Activating => 1,
            DriverPhase::Ready => 2,
        }
    }

    fn from_u8(value: u8) -> DriverPhase {
        match value {
            0 => DriverPhase::Resetting,
            1 => DriverPhase::Activating,
            _ => DriverPhase::Ready,
        }
    }
}

/// What every gripper gets told during one tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhaseAction {
    Deactivate,
    Activate,
    ForwardCommands,
}

#[derive(Debug)]
pub struct ActivationStateMachine {
    phase: DriverPhase,
    reset_guard: Duration,
}

impl ActivationStateMachine {
    pub fn new(reset_guard: Duration) -> Self {
        Self {
            phase: DriverPhase::Resetting,
            reset_guard,
        }
    }

    pub fn phase(&self) -> DriverPhase {
        self.phase
    }

    pub fn is_ready(&self) -> bool {
        self.phase == DriverPhase::Ready
    }

    /// Advance by one tick.
    ///
    /// `elapsed` is measured from loop start, `all_ready` must be true only
    /// when every gripper reported ready in the readings of this tick.
    pub fn step(&mut self, elapsed: Duration, all_ready: bool) -> PhaseAction {
        match self.phase {
            DriverPhase::Resetting => {
                if elapsed < self.reset_guard {
                    PhaseAction::Deactivate
                } else {
                    self.transition(DriverPhase::Activating);
                    PhaseAction::Activate
                }
            }
            DriverPhase::Activating => {
                if all_ready {
                    self.transition(DriverPhase::Ready);
                }
                PhaseAction::Activate
            }
            DriverPhase::Ready => PhaseAction::ForwardCommands,
        }
    }

    fn transition(&mut self, next: DriverPhase) {
        debug_assert!(next > self.phase);
        tracing::info!("Gripper driver phase {:?} -> {:?}", self.phase, next);
        self.phase = next;
    }
}

/// Phase and ready flag as seen from outside the control loop.
#[derive(Debug, Default)]
pub struct DriverStatus {
    phase: AtomicU8,
}

impl DriverStatus {
    pub fn phase(&self) -> DriverPhase {
        DriverPhase::from_u8(self.phase.load(Ordering::Acquire))
    }

    pub fn is_ready(&self) -> bool {
        self.phase() == DriverPhase::Ready
    }

    pub(crate) fn publish(&self, phase: DriverPhase) {
        // fetch_max keeps the shared view monotonic as well
        self.phase.fetch_max(phase.as_u8(), Ordering::AcqRel);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const GUARD: Duration = Duration::from_millis(500);

    fn ms(value: u64) -> Duration {
        Duration::from_millis(value)
    }

    #[test]
    fn resets_until_guard_elapsed() {
        let mut machine = ActivationStateMachine::new(GUARD);
        for elapsed in (0..500).step_by(10) {
            assert_eq!(machine.step(ms(elapsed), true), PhaseAction::Deactivate);
            assert_eq!(machine.phase(), DriverPhase::Resetting);
        }
        assert_eq!(machine.step(ms(500), false), PhaseAction::Activate);
        assert_eq!(machine.phase(), DriverPhase::Activating);
    }

    #[test]
    fn never_leaves_reset_early_with_uneven_ticks() {
        for jitter in [1, 3, 7, 13, 499] {
            let mut machine = ActivationStateMachine::new(GUARD);
            let mut elapsed = 0;
            while machine.phase() == DriverPhase::Resetting {
                machine.step(ms(elapsed), true);
                if machine.phase() == DriverPhase::Activating {
                    assert!(ms(elapsed) >= GUARD, "left reset at {}ms", elapsed);
                }
                elapsed += jitter;
            }
        }
    }

    #[test]
    fn stays_activating_until_all_ready() {
        let mut machine = ActivationStateMachine::new(GUARD);
        machine.step(GUARD, false);
        for tick in 0..1000 {
            assert_eq!(
                machine.step(GUARD + ms(tick * 10), false),
                PhaseAction::Activate
            );
            assert_eq!(machine.phase(), DriverPhase::Activating);
        }
        assert_eq!(machine.step(ms(20_000), true), PhaseAction::Activate);
        assert!(machine.is_ready());
        assert_eq!(machine.step(ms(20_010), false), PhaseAction::ForwardCommands);
    }

    #[test]
    fn ready_is_terminal() {
        let mut machine = ActivationStateMachine::new(GUARD);
        machine.step(GUARD, true);
        machine.step(GUARD, true);
        assert!(machine.is_ready());
        for elapsed in [0, 100, 499, 500, 10_000] {
            assert_eq!(machine.step(ms(elapsed), false), PhaseAction::ForwardCommands);
            assert_eq!(machine.phase(), DriverPhase::Ready);
        }
    }

    #[test]
    fn shared_status_does_not_regress() {
        let status = DriverStatus::default();
        assert_eq!(status.phase(), DriverPhase::Resetting);
        status.publish(DriverPhase::Ready);
        status.publish(DriverPhase::Activating);
        assert_eq!(status.phase(), DriverPhase::Ready);
        assert!(status.is_ready());
    }
}
