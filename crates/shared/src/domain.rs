use serde::{Deserialize, Serialize};

macro_rules! name_newtype {
    ($name:ident) => {
        #[derive(
            Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self(value)
            }
        }
    };
}

name_newtype!(SessionId);
name_newtype!(AgentName);
name_newtype!(SystemKey);

/// Lifecycle phase of a simulation session.
///
/// The wire strings are the backend's state vocabulary; aliases cover the
/// scenario-specific synonyms it emits for the same client-visible phase.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionPhase {
    #[default]
    Setup,
    #[serde(alias = "INITIALIZING")]
    Connecting,
    #[serde(alias = "INITIAL_ALERT")]
    Running,
    AwaitingPlayerChoice,
    InConversation,
    AgentProcessing,
    #[serde(alias = "DECISION_POINT_SHUTDOWN")]
    DecisionPoint,
    #[serde(alias = "AWAITING_ANALYST_BRIEFING")]
    AwaitingBriefing,
    #[serde(alias = "POST_INITIAL_CRISIS")]
    Debriefing,
    Ended,
    Error,
}

impl SessionPhase {
    /// Canonical wire spelling of this phase.
    pub fn wire_name(&self) -> &'static str {
        match self {
            SessionPhase::Setup => "SETUP",
            SessionPhase::Connecting => "CONNECTING",
            SessionPhase::Running => "RUNNING",
            SessionPhase::AwaitingPlayerChoice => "AWAITING_PLAYER_CHOICE",
            SessionPhase::InConversation => "IN_CONVERSATION",
            SessionPhase::AgentProcessing => "AGENT_PROCESSING",
            SessionPhase::DecisionPoint => "DECISION_POINT",
            SessionPhase::AwaitingBriefing => "AWAITING_BRIEFING",
            SessionPhase::Debriefing => "DEBRIEFING",
            SessionPhase::Ended => "ENDED",
            SessionPhase::Error => "ERROR",
        }
    }

    /// No transitions leave a terminal phase short of a full session reset.
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionPhase::Ended | SessionPhase::Error)
    }

    /// Whether free-text player input is accepted in this phase. The
    /// stream must also be open for input to actually reach the backend.
    pub fn allows_input(&self) -> bool {
        !matches!(
            self,
            SessionPhase::Setup
                | SessionPhase::Connecting
                | SessionPhase::Error
                | SessionPhase::Ended
                | SessionPhase::Debriefing
                | SessionPhase::AgentProcessing
        )
    }
}

impl std::fmt::Display for SessionPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.wire_name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentAvailability {
    Available,
    Ringing,
    InCall,
    Unavailable,
}

impl AgentAvailability {
    /// Collapses the backend's open-ended agent state strings
    /// ("busy_monitoring", "on_call_with_cto", ...) into the four
    /// availability buckets the client reasons about.
    pub fn from_wire(state: &str) -> Self {
        let state = state.to_ascii_lowercase();
        if state == "available" {
            Self::Available
        } else if state == "ringing" || state.starts_with("trying_to_call") {
            Self::Ringing
        } else if state == "in_call"
            || state == "in_conversation"
            || state.starts_with("on_call")
        {
            Self::InCall
        } else {
            Self::Unavailable
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn phase_parses_backend_synonyms() {
        let phase: SessionPhase =
            serde_json::from_str("\"POST_INITIAL_CRISIS\"").expect("alias parses");
        assert_eq!(phase, SessionPhase::Debriefing);

        let phase: SessionPhase =
            serde_json::from_str("\"DECISION_POINT_SHUTDOWN\"").expect("alias parses");
        assert_eq!(phase, SessionPhase::DecisionPoint);

        assert!(serde_json::from_str::<SessionPhase>("\"PAUSED\"").is_err());
    }

    #[test]
    fn input_phases_match_enablement_rule() {
        let blocked = [
            SessionPhase::Setup,
            SessionPhase::Connecting,
            SessionPhase::Error,
            SessionPhase::Ended,
            SessionPhase::Debriefing,
            SessionPhase::AgentProcessing,
        ];
        for phase in blocked {
            assert!(!phase.allows_input(), "{phase:?} should block input");
        }
        for phase in [
            SessionPhase::Running,
            SessionPhase::AwaitingPlayerChoice,
            SessionPhase::InConversation,
            SessionPhase::DecisionPoint,
            SessionPhase::AwaitingBriefing,
        ] {
            assert!(phase.allows_input(), "{phase:?} should allow input");
        }
    }

    #[test]
    fn agent_availability_buckets() {
        assert_eq!(
            AgentAvailability::from_wire("available"),
            AgentAvailability::Available
        );
        assert_eq!(
            AgentAvailability::from_wire("trying_to_call_cto"),
            AgentAvailability::Ringing
        );
        assert_eq!(
            AgentAvailability::from_wire("on_call_with_cto"),
            AgentAvailability::InCall
        );
        assert_eq!(
            AgentAvailability::from_wire("busy_monitoring"),
            AgentAvailability::Unavailable
        );
    }
}
