//! Per-machine lifecycle state machine
//!
//! Every (pipeline instance, machine) pair carries one [`MachineState`].
//! Transitions follow a fixed edge table; there is no terminal state, every
//! failure state has a retry edge back into the operation that produced it.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Lifecycle state of a pipeline instance on one machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MachineState {
    /// Deployment in progress, also the state of a freshly created pairing
    Initializing,
    /// Deployed and idle
    NotStarted,
    Starting,
    Running,
    Stopping,
    StartFailed,
    StopFailed,
    InitializeFailed,
}

impl MachineState {
    pub const ALL: [MachineState; 8] = [
        MachineState::Initializing,
        MachineState::NotStarted,
        MachineState::Starting,
        MachineState::Running,
        MachineState::Stopping,
        MachineState::StartFailed,
        MachineState::StopFailed,
        MachineState::InitializeFailed,
    ];

    /// States reachable in one step from this state
    pub fn allowed_transitions(self) -> &'static [MachineState] {
        use MachineState::*;

        match self {
            Initializing => &[NotStarted, InitializeFailed],
            NotStarted => &[Starting],
            Starting => &[Running, StartFailed],
            Running => &[Stopping],
            Stopping => &[NotStarted, StopFailed],
            StartFailed => &[Starting],
            StopFailed => &[Stopping],
            InitializeFailed => &[Initializing],
        }
    }

    pub fn can_transition_to(self, next: MachineState) -> bool {
        self.allowed_transitions().contains(&next)
    }

    /// Applies a transition, rejecting edges outside the table
    pub fn transition_to(self, next: MachineState) -> Result<MachineState, TransitionError> {
        if self.can_transition_to(next) {
            Ok(next)
        } else {
            Err(TransitionError::Illegal {
                from: self,
                to: next,
            })
        }
    }

    /// True while an operation is driving this machine
    pub fn is_in_progress(self) -> bool {
        matches!(
            self,
            MachineState::Initializing | MachineState::Starting | MachineState::Stopping
        )
    }

    pub fn is_failure(self) -> bool {
        matches!(
            self,
            MachineState::StartFailed | MachineState::StopFailed | MachineState::InitializeFailed
        )
    }

    /// Whether a process id recorded for this machine is stale in this state
    pub fn clears_pid(self) -> bool {
        matches!(
            self,
            MachineState::NotStarted | MachineState::Stopping | MachineState::StopFailed
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            MachineState::Initializing => "INITIALIZING",
            MachineState::NotStarted => "NOT_STARTED",
            MachineState::Starting => "STARTING",
            MachineState::Running => "RUNNING",
            MachineState::Stopping => "STOPPING",
            MachineState::StartFailed => "START_FAILED",
            MachineState::StopFailed => "STOP_FAILED",
            MachineState::InitializeFailed => "INITIALIZE_FAILED",
        }
    }
}

impl fmt::Display for MachineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MachineState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        MachineState::ALL
            .into_iter()
            .find(|state| state.as_str() == s)
            .ok_or_else(|| format!("Invalid machine state: {s}"))
    }
}

/// High-level intent the orchestrator can drive on a set of machines
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OperationKind {
    Initialize,
    Start,
    Stop,
    /// Kills the process without a grace period; always ends `NotStarted`
    ForceStop,
    DeleteDirectory,
    /// Pushes caller-supplied configuration files
    UpdateConfig,
    /// Re-pushes the stored configuration files
    RefreshConfig,
}

impl OperationKind {
    pub const ALL: [OperationKind; 7] = [
        OperationKind::Initialize,
        OperationKind::Start,
        OperationKind::Stop,
        OperationKind::ForceStop,
        OperationKind::DeleteDirectory,
        OperationKind::UpdateConfig,
        OperationKind::RefreshConfig,
    ];

    /// State held while the operation runs
    ///
    /// Directory and configuration maintenance does not move the lifecycle.
    pub fn in_progress_state(self) -> Option<MachineState> {
        match self {
            OperationKind::Initialize => Some(MachineState::Initializing),
            OperationKind::Start => Some(MachineState::Starting),
            OperationKind::Stop | OperationKind::ForceStop => Some(MachineState::Stopping),
            OperationKind::DeleteDirectory
            | OperationKind::UpdateConfig
            | OperationKind::RefreshConfig => None,
        }
    }

    pub fn success_state(self) -> Option<MachineState> {
        match self {
            OperationKind::Initialize => Some(MachineState::NotStarted),
            OperationKind::Start => Some(MachineState::Running),
            OperationKind::Stop | OperationKind::ForceStop => Some(MachineState::NotStarted),
            OperationKind::DeleteDirectory
            | OperationKind::UpdateConfig
            | OperationKind::RefreshConfig => None,
        }
    }

    pub fn failure_state(self) -> Option<MachineState> {
        match self {
            OperationKind::Initialize => Some(MachineState::InitializeFailed),
            OperationKind::Start => Some(MachineState::StartFailed),
            OperationKind::Stop => Some(MachineState::StopFailed),
            OperationKind::ForceStop => Some(MachineState::NotStarted),
            OperationKind::DeleteDirectory
            | OperationKind::UpdateConfig
            | OperationKind::RefreshConfig => None,
        }
    }

    /// Checks that this operation may be requested from `current`
    ///
    /// `Initialize` is also accepted from `Initializing`, the state of a pairing
    /// that has never been deployed. Callers must still reject a second
    /// request while one is in flight.
    pub fn validate_from(self, current: MachineState) -> Result<(), TransitionError> {
        let allowed = match self {
            OperationKind::Initialize => {
                current == MachineState::Initializing
                    || current.can_transition_to(MachineState::Initializing)
            }
            OperationKind::Start => current.can_transition_to(MachineState::Starting),
            OperationKind::Stop | OperationKind::ForceStop => {
                current.can_transition_to(MachineState::Stopping)
            }
            OperationKind::UpdateConfig | OperationKind::RefreshConfig => matches!(
                current,
                MachineState::NotStarted | MachineState::StartFailed
            ),
            OperationKind::DeleteDirectory => matches!(
                current,
                MachineState::Initializing
                    | MachineState::NotStarted
                    | MachineState::StartFailed
                    | MachineState::InitializeFailed
            ),
        };

        if allowed {
            Ok(())
        } else {
            Err(TransitionError::OperationNotAllowed {
                operation: self,
                state: current,
            })
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            OperationKind::Initialize => "INITIALIZE",
            OperationKind::Start => "START",
            OperationKind::Stop => "STOP",
            OperationKind::ForceStop => "FORCE_STOP",
            OperationKind::DeleteDirectory => "DELETE_DIRECTORY",
            OperationKind::UpdateConfig => "UPDATE_CONFIG",
            OperationKind::RefreshConfig => "REFRESH_CONFIG",
        }
    }

    /// Human-readable verb used in task names and error messages
    pub fn verb(self) -> &'static str {
        match self {
            OperationKind::Initialize => "initialize",
            OperationKind::Start => "start",
            OperationKind::Stop => "stop",
            OperationKind::ForceStop => "force stop",
            OperationKind::DeleteDirectory => "delete directory",
            OperationKind::UpdateConfig => "update config",
            OperationKind::RefreshConfig => "refresh config",
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.verb())
    }
}

impl FromStr for OperationKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        OperationKind::ALL
            .into_iter()
            .find(|op| op.as_str() == s)
            .ok_or_else(|| format!("Invalid operation kind: {s}"))
    }
}

/// Rejected lifecycle change
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransitionError {
    #[error("illegal transition from {from} to {to}")]
    Illegal { from: MachineState, to: MachineState },

    #[error("cannot {operation} while machine is {state}")]
    OperationNotAllowed {
        operation: OperationKind,
        state: MachineState,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_edge_table() {
        use MachineState::*;

        let legal = [
            (Initializing, NotStarted),
            (Initializing, InitializeFailed),
            (NotStarted, Starting),
            (Starting, Running),
            (Starting, StartFailed),
            (Running, Stopping),
            (Stopping, NotStarted),
            (Stopping, StopFailed),
            (StartFailed, Starting),
            (StopFailed, Stopping),
            (InitializeFailed, Initializing),
        ];

        for from in MachineState::ALL {
            for to in MachineState::ALL {
                let expected = legal.contains(&(from, to));
                assert_eq!(
                    from.can_transition_to(to),
                    expected,
                    "{} -> {}",
                    from,
                    to
                );
            }
        }
    }

    #[test]
    fn test_transition_to_rejects_illegal_edge() {
        let err = MachineState::Stopping
            .transition_to(MachineState::Starting)
            .unwrap_err();
        assert_eq!(
            err,
            TransitionError::Illegal {
                from: MachineState::Stopping,
                to: MachineState::Starting
            }
        );
    }

    #[test]
    fn test_every_failure_state_has_retry_edge() {
        for state in MachineState::ALL.into_iter().filter(|s| s.is_failure()) {
            assert_eq!(state.allowed_transitions().len(), 1);
            assert!(state.allowed_transitions()[0].is_in_progress());
        }
    }

    #[test]
    fn test_operation_validation() {
        assert!(OperationKind::Start.validate_from(MachineState::NotStarted).is_ok());
        assert!(OperationKind::Start.validate_from(MachineState::StartFailed).is_ok());
        assert!(OperationKind::Start.validate_from(MachineState::Stopping).is_err());
        assert!(OperationKind::Start.validate_from(MachineState::Starting).is_err());

        assert!(OperationKind::Stop.validate_from(MachineState::Running).is_ok());
        assert!(OperationKind::Stop.validate_from(MachineState::StopFailed).is_ok());
        assert!(OperationKind::Stop.validate_from(MachineState::StartFailed).is_err());
        assert!(OperationKind::Stop.validate_from(MachineState::Starting).is_err());

        assert!(OperationKind::Initialize.validate_from(MachineState::Initializing).is_ok());
        assert!(
            OperationKind::Initialize
                .validate_from(MachineState::InitializeFailed)
                .is_ok()
        );
        assert!(OperationKind::Initialize.validate_from(MachineState::Running).is_err());

        assert!(
            OperationKind::DeleteDirectory
                .validate_from(MachineState::NotStarted)
                .is_ok()
        );
        assert!(
            OperationKind::DeleteDirectory
                .validate_from(MachineState::Running)
                .is_err()
        );
    }

    #[test]
    fn test_delete_directory_accepted_states() {
        use MachineState::*;

        let accepted = [Initializing, NotStarted, StartFailed, InitializeFailed];
        for state in MachineState::ALL {
            assert_eq!(
                OperationKind::DeleteDirectory.validate_from(state).is_ok(),
                accepted.contains(&state),
                "delete directory from {}",
                state
            );
        }
    }

    #[test]
    fn test_config_operations_need_an_idle_deployment() {
        use MachineState::*;

        for op in [OperationKind::UpdateConfig, OperationKind::RefreshConfig] {
            for state in MachineState::ALL {
                assert_eq!(
                    op.validate_from(state).is_ok(),
                    matches!(state, NotStarted | StartFailed),
                    "{} from {}",
                    op,
                    state
                );
            }
            assert!(op.in_progress_state().is_none());
            assert!(op.failure_state().is_none());
        }
    }

    #[test]
    fn test_force_stop_always_ends_not_started() {
        let op = OperationKind::ForceStop;
        assert!(op.validate_from(MachineState::Running).is_ok());
        assert!(op.validate_from(MachineState::StopFailed).is_ok());
        assert!(op.validate_from(MachineState::NotStarted).is_err());
        assert_eq!(op.success_state(), Some(MachineState::NotStarted));
        assert_eq!(op.failure_state(), Some(MachineState::NotStarted));

        let err = op.validate_from(MachineState::Starting).unwrap_err();
        assert_eq!(err.to_string(), "cannot force stop while machine is STARTING");
    }

    #[test]
    fn test_operation_string_round_trip() {
        for op in OperationKind::ALL {
            assert_eq!(op.as_str().parse::<OperationKind>().unwrap(), op);
        }
        assert!("RESTART".parse::<OperationKind>().is_err());
    }

    #[test]
    fn test_operation_states_follow_edges() {
        for op in [
            OperationKind::Initialize,
            OperationKind::Start,
            OperationKind::Stop,
            OperationKind::ForceStop,
        ] {
            let in_progress = op.in_progress_state().unwrap();
            assert!(in_progress.can_transition_to(op.success_state().unwrap()));
            assert!(in_progress.can_transition_to(op.failure_state().unwrap()));
        }
        assert!(OperationKind::DeleteDirectory.in_progress_state().is_none());
    }

    #[test]
    fn test_state_string_round_trip() {
        for state in MachineState::ALL {
            assert_eq!(state.as_str().parse::<MachineState>().unwrap(), state);
        }
        assert!("BOGUS".parse::<MachineState>().is_err());
    }

    #[test]
    fn test_state_serializes_screaming_snake_case() {
        let json = serde_json::to_string(&MachineState::StartFailed).unwrap();
        assert_eq!(json, "\"START_FAILED\"");
    }
}
