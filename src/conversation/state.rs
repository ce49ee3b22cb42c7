//! Call lifecycle state.

use super::correlator::TurnToken;
use serde::Serialize;
use std::fmt;

/// What an active call is doing right now.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActivePhase {
    /// Capturing and endpointing the human's speech.
    Listening,
    /// Waiting for the remote reply to a turn. Capture stays open so a new
    /// utterance can supersede it.
    Processing(TurnToken),
    /// Synthetic audio owned by the given interaction is playing.
    Speaking(TurnToken),
    /// Active but not capturing, e.g. after the recognizer stopped.
    Waiting,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallState {
    Idle,
    Connecting,
    Active(ActivePhase),
    Ending,
    Ended,
    Error,
    SetupRequired,
}

/// Flat lifecycle status, as reported to observers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CallStatus {
    Idle,
    Connecting,
    Active,
    Ending,
    Ended,
    Error,
    SetupRequired,
}

impl CallStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CallStatus::Idle => "idle",
            CallStatus::Connecting => "connecting",
            CallStatus::Active => "active",
            CallStatus::Ending => "ending",
            CallStatus::Ended => "ended",
            CallStatus::Error => "error",
            CallStatus::SetupRequired => "setup_required",
        }
    }
}

impl fmt::Display for CallStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl CallState {
    pub fn status(&self) -> CallStatus {
        match self {
            CallState::Idle => CallStatus::Idle,
            CallState::Connecting => CallStatus::Connecting,
            CallState::Active(_) => CallStatus::Active,
            CallState::Ending => CallStatus::Ending,
            CallState::Ended => CallStatus::Ended,
            CallState::Error => CallStatus::Error,
            CallState::SetupRequired => CallStatus::SetupRequired,
        }
    }

    pub fn phase(&self) -> Option<ActivePhase> {
        match self {
            CallState::Active(phase) => Some(*phase),
            _ => None,
        }
    }

    pub fn is_active(&self) -> bool {
        matches!(self, CallState::Active(_))
    }

    /// States from which a new call may be started.
    pub fn can_start(&self) -> bool {
        matches!(self, CallState::Idle | CallState::Ended | CallState::Error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conversation::correlator::TurnCounter;

    #[test]
    fn test_active_phases_share_status() {
        let token = TurnCounter::new().next();
        for phase in [
            ActivePhase::Listening,
            ActivePhase::Processing(token),
            ActivePhase::Speaking(token),
            ActivePhase::Waiting,
        ] {
            let state = CallState::Active(phase);
            assert_eq!(state.status(), CallStatus::Active);
            assert_eq!(state.phase(), Some(phase));
        }
    }

    #[test]
    fn test_can_start() {
        assert!(CallState::Idle.can_start());
        assert!(CallState::Error.can_start());
        assert!(CallState::Ended.can_start());
        assert!(!CallState::Connecting.can_start());
        assert!(!CallState::Active(ActivePhase::Listening).can_start());
        assert!(!CallState::Ending.can_start());
        assert!(!CallState::SetupRequired.can_start());
    }

    #[test]
    fn test_status_serializes_snake_case() {
        assert_eq!(
            serde_json::to_string(&CallStatus::SetupRequired).unwrap(),
            "\"setup_required\""
        );
        assert_eq!(CallStatus::SetupRequired.to_string(), "setup_required");
    }
}
