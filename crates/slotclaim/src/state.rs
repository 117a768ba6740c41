//! Session phases and the allowed transitions between them.

use serde::{Deserialize, Serialize};

/// Phase of a booking session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Init,
    Authenticating,
    SelectingCampus,
    SelectingFacility,
    AwaitingDate,
    SelectingSlots,
    Submitting,
    Classifying,
    Retrying,
    Success,
    Exhausted,
    TimedOut,
    Fatal,
}

impl SessionState {
    /// Phases that run exactly once per session and are never retried.
    pub fn is_one_time(self) -> bool {
        matches!(
            self,
            Self::Authenticating | Self::SelectingCampus | Self::SelectingFacility | Self::AwaitingDate
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Success | Self::Exhausted | Self::TimedOut | Self::Fatal
        )
    }

    /// The transition table.
    pub fn can_transition_to(self, next: SessionState) -> bool {
        use SessionState::*;
        matches!(
            (self, next),
            (Init, Authenticating)
                | (Authenticating, SelectingCampus | Fatal)
                | (SelectingCampus, SelectingFacility | Fatal)
                | (SelectingFacility, AwaitingDate | Fatal)
                | (AwaitingDate, SelectingSlots | TimedOut | Fatal)
                | (SelectingSlots, Submitting | Exhausted | TimedOut)
                | (Submitting, Classifying | Retrying)
                | (Classifying, Success | Retrying)
                | (Retrying, SelectingSlots | Exhausted | TimedOut)
        )
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Init => "init",
            Self::Authenticating => "authenticating",
            Self::SelectingCampus => "selecting campus",
            Self::SelectingFacility => "selecting facility",
            Self::AwaitingDate => "awaiting date",
            Self::SelectingSlots => "selecting slots",
            Self::Submitting => "submitting",
            Self::Classifying => "classifying",
            Self::Retrying => "retrying",
            Self::Success => "success",
            Self::Exhausted => "exhausted",
            Self::TimedOut => "timed out",
            Self::Fatal => "fatal",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use SessionState::*;

    const ALL: [SessionState; 13] = [
        Init,
        Authenticating,
        SelectingCampus,
        SelectingFacility,
        AwaitingDate,
        SelectingSlots,
        Submitting,
        Classifying,
        Retrying,
        Success,
        Exhausted,
        TimedOut,
        Fatal,
    ];

    #[test]
    fn test_terminal_states_have_no_exits() {
        for from in ALL.iter().filter(|s| s.is_terminal()) {
            assert!(ALL.iter().all(|to| !from.can_transition_to(*to)), "{from} has an exit");
        }
    }

    #[test]
    fn test_only_one_time_phases_reach_fatal() {
        for from in ALL {
            if from.can_transition_to(Fatal) {
                assert!(from.is_one_time(), "{from} may go fatal");
            }
        }
    }

    #[test]
    fn test_retry_loop_never_reenters_one_time_phases() {
        for from in [SelectingSlots, Submitting, Classifying, Retrying] {
            for to in ALL.iter().filter(|s| s.is_one_time()) {
                assert!(!from.can_transition_to(*to));
            }
        }
    }

    #[test]
    fn test_retrying_exits() {
        assert!(Retrying.can_transition_to(SelectingSlots));
        assert!(Retrying.can_transition_to(Exhausted));
        assert!(Retrying.can_transition_to(TimedOut));
        assert!(!Retrying.can_transition_to(Success));
    }
}
