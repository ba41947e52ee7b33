//! Status records exchanged with the service supervisor.
//!
//! Numeric values follow the Win32 service control protocol so the records
//! can be handed to the Service Control Manager unchanged and so persisted
//! snapshots stay readable by tooling that already knows those codes.

use std::time::Duration;

use bitflags::bitflags;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// Exit code reported alongside a healthy status.
pub const NO_ERROR: u32 = 0;

/// Exit code reported when a lifecycle hook failed during start.
///
/// Matches `ERROR_EXCEPTION_IN_SERVICE`.
pub const START_FAILURE_EXIT_CODE: u32 = 1064;

/// Lifecycle state of a service.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize, Display, EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ServiceState {
    /// Not running.
    Stopped,
    /// `on_start` is executing.
    StartPending,
    /// `on_stop` is executing.
    StopPending,
    /// Started and accepting controls.
    Running,
    /// `on_continue` is executing.
    ContinuePending,
    /// `on_pause` is executing.
    PausePending,
    /// Paused until a continue control arrives.
    Paused,
}

impl ServiceState {
    /// Returns the Win32 numeric value of the state.
    #[must_use]
    pub const fn code(self) -> u32 {
        match self {
            Self::Stopped => 1,
            Self::StartPending => 2,
            Self::StopPending => 3,
            Self::Running => 4,
            Self::ContinuePending => 5,
            Self::PausePending => 6,
            Self::Paused => 7,
        }
    }

    /// Parses a Win32 numeric state value.
    #[must_use]
    pub const fn from_code(code: u32) -> Option<Self> {
        match code {
            1 => Some(Self::Stopped),
            2 => Some(Self::StartPending),
            3 => Some(Self::StopPending),
            4 => Some(Self::Running),
            5 => Some(Self::ContinuePending),
            6 => Some(Self::PausePending),
            7 => Some(Self::Paused),
            _ => None,
        }
    }

    /// Reports whether the state marks a transition in progress.
    #[must_use]
    pub const fn is_pending(self) -> bool {
        matches!(
            self,
            Self::StartPending | Self::StopPending | Self::ContinuePending | Self::PausePending
        )
    }
}

bitflags! {
    /// Controls a service declares it will accept.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct AcceptedControls: u32 {
        /// `Stop` is accepted.
        const STOP = 0x0000_0001;
        /// `Pause` and `Continue` are accepted.
        const PAUSE_CONTINUE = 0x0000_0002;
        /// `Shutdown` notifications are accepted.
        const SHUTDOWN = 0x0000_0004;
    }
}

/// Control codes delivered by the supervisor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ControlCode {
    /// Stop the service.
    Stop,
    /// Pause the service.
    Pause,
    /// Resume a paused service.
    Continue,
    /// Report the current status again.
    Interrogate,
    /// The host is shutting down.
    Shutdown,
    /// A code this crate does not handle.
    Other(u32),
}

impl ControlCode {
    /// Maps a Win32 control value onto a [`ControlCode`].
    #[must_use]
    pub const fn from_code(code: u32) -> Self {
        match code {
            1 => Self::Stop,
            2 => Self::Pause,
            3 => Self::Continue,
            4 => Self::Interrogate,
            5 => Self::Shutdown,
            other => Self::Other(other),
        }
    }

    /// Capability bit that must be accepted before the code is honoured.
    ///
    /// `Interrogate` is always honoured and unknown codes never are, so both
    /// return `None`.
    #[must_use]
    pub const fn required_control(self) -> Option<AcceptedControls> {
        match self {
            Self::Stop => Some(AcceptedControls::STOP),
            Self::Pause | Self::Continue => Some(AcceptedControls::PAUSE_CONTINUE),
            Self::Shutdown => Some(AcceptedControls::SHUTDOWN),
            Self::Interrogate | Self::Other(_) => None,
        }
    }
}

/// Status record reported to the supervisor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServiceStatus {
    /// Current lifecycle state.
    pub state: ServiceState,
    /// Controls the service accepts.
    pub accepted_controls: AcceptedControls,
    /// Win32-style exit code; zero unless the service failed.
    pub win32_exit_code: u32,
    /// Liveness counter advanced on every pending report.
    pub checkpoint: u32,
    /// Estimated time until the next report.
    pub wait_hint: Duration,
}

impl ServiceStatus {
    /// Builds the initial status of a service that has not started.
    #[must_use]
    pub const fn stopped(accepted_controls: AcceptedControls) -> Self {
        Self {
            state: ServiceState::Stopped,
            accepted_controls,
            win32_exit_code: NO_ERROR,
            checkpoint: 0,
            wait_hint: Duration::ZERO,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(ServiceState::Stopped, false)]
    #[case(ServiceState::StartPending, true)]
    #[case(ServiceState::StopPending, true)]
    #[case(ServiceState::Running, false)]
    #[case(ServiceState::ContinuePending, true)]
    #[case(ServiceState::PausePending, true)]
    #[case(ServiceState::Paused, false)]
    fn pending_states_are_flagged(#[case] state: ServiceState, #[case] pending: bool) {
        assert_eq!(state.is_pending(), pending);
        assert_eq!(ServiceState::from_code(state.code()), Some(state));
    }

    #[test]
    fn unknown_state_codes_are_rejected() {
        assert_eq!(ServiceState::from_code(0), None);
        assert_eq!(ServiceState::from_code(8), None);
    }

    #[test]
    fn control_codes_map_to_required_bits() {
        assert_eq!(
            ControlCode::from_code(1).required_control(),
            Some(AcceptedControls::STOP)
        );
        assert_eq!(
            ControlCode::from_code(3).required_control(),
            Some(AcceptedControls::PAUSE_CONTINUE)
        );
        assert_eq!(ControlCode::from_code(4).required_control(), None);
        assert_eq!(ControlCode::from_code(0x80), ControlCode::Other(0x80));
    }
}
