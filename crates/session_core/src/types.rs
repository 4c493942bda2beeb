use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use shared::{
    domain::{AgentAvailability, AgentName, SessionId, SessionPhase, SystemKey},
    protocol::{DebriefPayload, DecisionOption, LogFeedEntry},
};

/// Everything the player can ask the controller to do. Typed commands and
/// surface buttons funnel through the same submission path inside the
/// controller; there is no second way to reach the backend.
#[derive(Debug, Clone)]
pub enum PlayerCommand {
    /// Start a new simulation run using the configured scenario.
    Start,
    /// Free text typed into the command line.
    FreeText { text: String },
    /// A decision option chosen from the active decision surface.
    Decide { value: String },
    /// Answer to the active yes/no prompt.
    Answer { yes: bool },
    /// Call a specific agent.
    CallAgent { agent: AgentName },
    AnswerCall,
    IgnoreCall,
    HangUp,
    SubmitBriefing { talking_points: String },
    SubmitRating { rating: u8, feedback: Option<String> },
    DismissDebrief,
    /// Tear the controller down. The driver drains nothing after this.
    Exit,
}

/// Transport liveness as shown to the player.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionStatus {
    Connecting,
    Open,
    Retrying { attempt: u32, max_attempts: u32 },
    Closed,
    Failed { code: Option<u16> },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SurfaceKind {
    Decision,
    YesNo,
    Briefing,
}

/// The single special input mode layered over free text. At most one is
/// active at a time; showing a new one replaces the old.
#[derive(Debug, Clone)]
pub enum SurfacePrompt {
    Decision {
        title: Option<String>,
        summary: Option<String>,
        options: Vec<DecisionOption>,
    },
    YesNo {
        prompt: String,
        action_context: Option<String>,
    },
    Briefing {
        context_question: Option<String>,
    },
}

impl SurfacePrompt {
    pub fn kind(&self) -> SurfaceKind {
        match self {
            SurfacePrompt::Decision { .. } => SurfaceKind::Decision,
            SurfacePrompt::YesNo { .. } => SurfaceKind::YesNo,
            SurfacePrompt::Briefing { .. } => SurfaceKind::Briefing,
        }
    }
}

/// One prompt parked behind the debrief overlay, flushed on dismissal.
/// A yes/no prompt always claims the slot; a rating update may only claim
/// an empty slot or replace an earlier rating update.
#[derive(Debug, Clone)]
pub(crate) enum PendingPrompt {
    YesNo {
        prompt: String,
        action_context: Option<String>,
    },
    RatingUpdate(DebriefPayload),
}

/// Observable session state. Owned and mutated exclusively by the driver
/// task; everything a front-end renders derives from the intents that
/// announce each change.
#[derive(Debug, Clone, Default)]
pub struct Session {
    pub id: Option<SessionId>,
    pub phase: SessionPhase,
    pub scenario: Option<String>,
    pub player_name: Option<String>,
    pub player_role: Option<String>,
    pub intensity: Option<f64>,
    pub agent_in_conversation: Option<AgentName>,
    pub systems: BTreeMap<SystemKey, String>,
    pub agents: BTreeMap<AgentName, String>,
    pub missed_calls: BTreeSet<AgentName>,
    pub active_surface: Option<SurfacePrompt>,
    pub debrief_visible: bool,
    pub(crate) pending_prompt: Option<PendingPrompt>,
    pub(crate) suppress_marker: Option<String>,
    pub connection_open: bool,
    pub input_enabled: bool,
}

/// Presentation intent: what should be shown, not how. Front-ends render
/// these without reaching back into session state.
#[derive(Debug, Clone)]
pub enum UiIntent {
    SessionInitialized {
        session: SessionId,
        scenario: Option<String>,
        player_name: Option<String>,
        player_role: Option<String>,
        intensity: Option<f64>,
    },
    PhaseChanged {
        phase: SessionPhase,
    },
    InputEnabled {
        enabled: bool,
    },
    Connection {
        status: ConnectionStatus,
    },
    MessageAppended {
        speaker: String,
        body: String,
        notification: Option<String>,
    },
    ClockUpdated {
        sim_time: Option<DateTime<Utc>>,
        end_time: Option<DateTime<Utc>>,
    },
    IntensityChanged {
        intensity: f64,
        reason: Option<String>,
    },
    SystemStatusChanged {
        system: SystemKey,
        status: String,
    },
    SystemBoardReplaced {
        systems: BTreeMap<SystemKey, String>,
    },
    AgentStatusChanged {
        agent: AgentName,
        availability: AgentAvailability,
        label: String,
    },
    AgentBoardReplaced {
        agents: BTreeMap<AgentName, String>,
    },
    MissedCallsChanged {
        agents: BTreeSet<AgentName>,
    },
    AgentThinking {
        agent: AgentName,
        thinking: bool,
    },
    CallWaiting {
        agent: AgentName,
        current_call: Option<String>,
    },
    SurfaceShown(SurfacePrompt),
    SurfaceCleared,
    DebriefShown(DebriefPayload),
    DebriefDismissed,
    RatingRequested,
    LogFeedAppended(LogFeedEntry),
    SessionEnded,
}
