// src/miner/device/lifecycle.rs
//! Device lifecycle state machine
//!
//! ```text
//! Uninitialized -> Ready -> Searching <-> Reporting
//!                    ^          |
//!                    +----------+   (job superseded / range done)
//! Ready | Searching | Reporting -> Errored
//! any non-closed state -> Draining -> Closed
//! ```

use crate::types::DeviceId;
use crate::utils::error::DeviceError;
use std::fmt;

/// Lifecycle states of a compute device
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum DeviceState {
    /// Created, setup not yet run
    Uninitialized,
    /// Setup done, waiting for work
    Ready,
    /// Searching an assigned nonce range
    Searching,
    /// Handing a batch of results to the pipeline
    Reporting,
    /// Repeated failure; excluded from dispatch
    Errored,
    /// Shutting down, releasing resources
    Draining,
    /// Resources released
    Closed,
}

impl DeviceState {
    /// Whether the lifecycle allows moving from `self` to `next`
    pub fn can_transition_to(self, next: DeviceState) -> bool {
        use DeviceState::*;
        matches!(
            (self, next),
            (Uninitialized, Ready)
                | (Uninitialized, Errored)
                | (Ready, Searching)
                | (Searching, Reporting)
                | (Reporting, Searching)
                | (Searching, Ready)
                | (Ready | Searching | Reporting, Errored)
                | (Uninitialized | Ready | Searching | Reporting | Errored, Draining)
                | (Draining, Closed)
        )
    }
}

impl fmt::Display for DeviceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Tracks the state of one device and rejects illegal transitions
#[derive(Debug)]
pub struct Lifecycle {
    device: DeviceId,
    state: DeviceState,
}

impl Lifecycle {
    /// Starts in [`DeviceState::Uninitialized`]
    pub fn new(device: DeviceId) -> Self {
        Lifecycle {
            device,
            state: DeviceState::Uninitialized,
        }
    }

    /// Current state
    pub fn state(&self) -> DeviceState {
        self.state
    }

    /// Moves to `next`; staying in the same state is a no-op
    pub fn advance(&mut self, next: DeviceState) -> Result<(), DeviceError> {
        if self.state == next {
            return Ok(());
        }
        if !self.state.can_transition_to(next) {
            return Err(DeviceError::InvalidTransition {
                device: self.device.to_string(),
                from: self.state.to_string(),
                to: next.to_string(),
            });
        }
        log::trace!("{}: {} -> {}", self.device, self.state, next);
        self.state = next;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::DeviceState::*;
    use super::*;

    #[test]
    fn happy_path_is_allowed() {
        let mut lc = Lifecycle::new(DeviceId::cpu(0));
        for next in [
            Ready, Searching, Reporting, Searching, Reporting, Searching, Ready, Draining, Closed,
        ] {
            lc.advance(next).unwrap();
        }
        assert_eq!(lc.state(), Closed);
    }

    #[test]
    fn errored_devices_can_only_drain() {
        assert!(Searching.can_transition_to(Errored));
        assert!(Errored.can_transition_to(Draining));
        assert!(!Errored.can_transition_to(Ready));
        assert!(!Errored.can_transition_to(Searching));
    }

    #[test]
    fn closed_is_terminal() {
        for next in [Uninitialized, Ready, Searching, Reporting, Errored, Draining] {
            assert!(!Closed.can_transition_to(next));
        }
    }

    #[test]
    fn reporting_cannot_skip_back_to_ready() {
        let mut lc = Lifecycle::new(DeviceId::gpu(1));
        lc.advance(Ready).unwrap();
        lc.advance(Searching).unwrap();
        lc.advance(Reporting).unwrap();
        let err = lc.advance(Ready).unwrap_err();
        assert!(matches!(err, DeviceError::InvalidTransition { .. }));
        assert_eq!(lc.state(), Reporting);
    }

    #[test]
    fn searching_requires_setup_first() {
        let mut lc = Lifecycle::new(DeviceId::cpu(2));
        assert!(lc.advance(Searching).is_err());
        assert!(lc.advance(Uninitialized).is_ok());
    }
}
