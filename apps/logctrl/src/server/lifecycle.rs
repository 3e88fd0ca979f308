use std::fmt;
use thiserror::Error;
use tracing::debug;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HostState {
    Idle,
    StreamingSetup,
    PumpingActive,
    ShuttingDown,
    Terminated,
}

impl HostState {
    pub fn as_str(self) -> &'static str {
        match self {
            HostState::Idle => "idle",
            HostState::StreamingSetup => "streaming-setup",
            HostState::PumpingActive => "pumping-active",
            HostState::ShuttingDown => "shutting-down",
            HostState::Terminated => "terminated",
        }
    }

    fn may_enter(self, next: HostState) -> bool {
        matches!(
            (self, next),
            (HostState::Idle, HostState::StreamingSetup)
                | (HostState::StreamingSetup, HostState::PumpingActive)
                | (HostState::StreamingSetup, HostState::ShuttingDown)
                | (HostState::PumpingActive, HostState::ShuttingDown)
                | (HostState::ShuttingDown, HostState::Terminated)
        )
    }
}

impl fmt::Display for HostState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("illegal host transition {from} -> {to}")]
pub struct TransitionError {
    pub from: HostState,
    pub to: HostState,
}

/// Tracks the parent process through setup, pumping and teardown.
#[derive(Debug)]
pub struct Lifecycle {
    state: HostState,
}

impl Lifecycle {
    pub fn new() -> Self {
        Self {
            state: HostState::Idle,
        }
    }

    pub fn state(&self) -> HostState {
        self.state
    }

    pub fn advance(&mut self, next: HostState) -> Result<(), TransitionError> {
        if !self.state.may_enter(next) {
            return Err(TransitionError {
                from: self.state,
                to: next,
            });
        }
        debug!(target = "host::lifecycle", from = %self.state, to = %next, "state transition");
        self.state = next;
        Ok(())
    }

    pub fn is_terminated(&self) -> bool {
        self.state == HostState::Terminated
    }
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_run_reaches_terminated() {
        let mut lifecycle = Lifecycle::new();
        for next in [
            HostState::StreamingSetup,
            HostState::PumpingActive,
            HostState::ShuttingDown,
            HostState::Terminated,
        ] {
            lifecycle.advance(next).unwrap();
        }
        assert!(lifecycle.is_terminated());
    }

    #[test]
    fn setup_failure_may_shut_down_directly() {
        let mut lifecycle = Lifecycle::new();
        lifecycle.advance(HostState::StreamingSetup).unwrap();
        lifecycle.advance(HostState::ShuttingDown).unwrap();
        assert_eq!(lifecycle.state(), HostState::ShuttingDown);
    }

    #[test]
    fn skipping_states_is_rejected() {
        let mut lifecycle = Lifecycle::new();
        let err = lifecycle.advance(HostState::PumpingActive).unwrap_err();
        assert_eq!(
            err,
            TransitionError {
                from: HostState::Idle,
                to: HostState::PumpingActive
            }
        );
        assert_eq!(lifecycle.state(), HostState::Idle);
        assert_eq!(err.to_string(), "illegal host transition idle -> pumping-active");
    }

    #[test]
    fn terminated_is_final() {
        let mut lifecycle = Lifecycle::new();
        lifecycle.advance(HostState::StreamingSetup).unwrap();
        lifecycle.advance(HostState::ShuttingDown).unwrap();
        lifecycle.advance(HostState::Terminated).unwrap();
        assert!(lifecycle.advance(HostState::StreamingSetup).is_err());
        assert!(lifecycle.advance(HostState::ShuttingDown).is_err());
    }
}
