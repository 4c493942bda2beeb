use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::{AgentName, SessionId, SessionPhase, SystemKey};

/// One server-pushed frame on the session stream.
///
/// Wire envelope is `{"type": ..., "payload": {...}}`. Timestamps stay raw
/// ISO strings here; the controller parses them where it needs real
/// datetimes so that one bad field degrades gracefully instead of dropping
/// the whole frame's siblings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum StreamEvent {
    InitialState(InitialStatePayload),
    StateChange {
        new_state: SessionPhase,
    },
    TimeUpdate {
        #[serde(default)]
        sim_time_iso: Option<String>,
        #[serde(default)]
        end_time_iso: Option<String>,
    },
    IntensityUpdate {
        current_intensity_mod: f64,
        #[serde(default)]
        reason: Option<String>,
    },
    SystemStatusUpdate {
        system_key: SystemKey,
        status: String,
        #[serde(default)]
        reason: Option<String>,
    },
    AgentStatusUpdate {
        agent_name: AgentName,
        state: String,
    },
    FullStatusUpdate {
        #[serde(default)]
        system_status: Option<BTreeMap<SystemKey, String>>,
        #[serde(default)]
        agent_status: Option<BTreeMap<AgentName, String>>,
        #[serde(default)]
        missed_calls: Option<Vec<AgentName>>,
    },
    MissedCallsUpdate {
        #[serde(default)]
        missed_calls: Vec<AgentName>,
    },
    CallWaiting {
        agent_name: AgentName,
        #[serde(default)]
        current_call: Option<String>,
    },
    CallIgnored {
        #[serde(default)]
        agent_name: Option<AgentName>,
    },
    DisplayMessage {
        speaker: String,
        message: String,
        #[serde(default)]
        notification: Option<String>,
    },
    AgentThinking {
        agent_name: AgentName,
    },
    ConversationStarted {
        agent_name: AgentName,
    },
    ConversationEnded {
        #[serde(default)]
        agent_name: Option<AgentName>,
    },
    DecisionPointInfo {
        #[serde(default)]
        title: Option<String>,
        #[serde(default)]
        summary: Option<String>,
        #[serde(default)]
        options: Vec<DecisionOption>,
        #[serde(default)]
        current_status_dict: Option<BTreeMap<SystemKey, String>>,
    },
    RequestYesNo {
        prompt: String,
        #[serde(default)]
        action_context: Option<String>,
    },
    RequestAnalystInput {
        #[serde(default)]
        context_question: Option<String>,
    },
    DebriefInfo(DebriefPayload),
    DebriefRatingUpdate {
        #[serde(default)]
        simulation_id: Option<SessionId>,
        #[serde(default)]
        performance_rating: Option<PerformanceRating>,
    },
    RequestUserRating {},
    SimulationEnded {
        #[serde(default)]
        message: Option<String>,
        #[serde(default)]
        debrief_data: Option<DebriefPayload>,
    },
    ErrorMessage {
        message: String,
    },
    LogFeedUpdate(LogFeedEntry),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InitialStatePayload {
    pub simulation_id: SessionId,
    #[serde(default)]
    pub scenario: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub intensity_key: Option<String>,
    #[serde(default)]
    pub current_intensity_mod: Option<f64>,
    #[serde(default)]
    pub duration: Option<u32>,
    #[serde(default)]
    pub player_name: Option<String>,
    #[serde(default)]
    pub player_role: Option<String>,
    #[serde(default)]
    pub start_time_iso: Option<String>,
    #[serde(default)]
    pub end_time_iso: Option<String>,
    #[serde(default)]
    pub current_sim_time_iso: Option<String>,
    #[serde(default)]
    pub initial_system_status: Option<BTreeMap<SystemKey, String>>,
    #[serde(default)]
    pub initial_agent_status: Option<BTreeMap<AgentName, String>>,
    #[serde(default)]
    pub current_state: Option<SessionPhase>,
    #[serde(default)]
    pub missed_calls: Vec<AgentName>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionOption {
    pub value: String,
    pub label: String,
}

/// Debrief content is display-oriented: the status report arrives as one
/// pre-rendered text block, not a structured map.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DebriefPayload {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub final_status_report: Option<String>,
    #[serde(default)]
    pub summary_points: Vec<String>,
    #[serde(default)]
    pub performance_rating: Option<PerformanceRating>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PerformanceRating {
    #[serde(default)]
    pub overall_score: Option<i32>,
    #[serde(default)]
    pub timeliness_score: Option<i32>,
    #[serde(default)]
    pub contact_strategy_score: Option<i32>,
    #[serde(default)]
    pub decision_quality_score: Option<i32>,
    #[serde(default)]
    pub efficiency_score: Option<i32>,
    #[serde(default)]
    pub qualitative_feedback: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub raw_response: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogFeedEntry {
    #[serde(default)]
    pub timestamp: Option<String>,
    #[serde(default)]
    pub severity: Option<String>,
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StartSessionRequest {
    pub scenario: String,
    pub intensity: String,
    pub duration: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StartSessionResponse {
    pub message: String,
    pub simulation_id: SessionId,
}

/// The action endpoint embeds its body one level down.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionRequestBody {
    pub action_request: ActionRequest,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionRequest {
    pub action: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionResponse {
    pub status: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BriefingRequest {
    pub talking_points: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RatingRequest {
    pub simulation_id: SessionId,
    pub rating: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub feedback: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RatingResponse {
    pub message: String,
}

/// Event types this client version understands. Anything else on the wire
/// is skipped, not rejected.
pub const KNOWN_EVENT_TYPES: &[&str] = &[
    "initial_state",
    "state_change",
    "time_update",
    "intensity_update",
    "system_status_update",
    "agent_status_update",
    "full_status_update",
    "missed_calls_update",
    "call_waiting",
    "call_ignored",
    "display_message",
    "agent_thinking",
    "conversation_started",
    "conversation_ended",
    "decision_point_info",
    "request_yes_no",
    "request_analyst_input",
    "debrief_info",
    "debrief_rating_update",
    "request_user_rating",
    "simulation_ended",
    "error_message",
    "log_feed_update",
];

#[derive(Debug, Clone)]
pub enum DecodedFrame {
    Event(StreamEvent),
    UnknownType { event_type: String },
    Malformed { event_type: String, error: String },
}

#[derive(Debug, Deserialize)]
struct RawEnvelope {
    #[serde(rename = "type")]
    event_type: String,
    #[serde(default)]
    #[allow(dead_code)]
    payload: Value,
}

/// Classifies one text frame without losing the unknown-vs-malformed
/// distinction: unknown types are a forward-compatibility no-op, while a
/// recognized type with a bad payload is a reportable decode failure.
pub fn decode_frame(text: &str) -> DecodedFrame {
    let raw: RawEnvelope = match serde_json::from_str(text) {
        Ok(raw) => raw,
        Err(err) => {
            return DecodedFrame::Malformed {
                event_type: String::new(),
                error: err.to_string(),
            }
        }
    };

    match serde_json::from_str::<StreamEvent>(text) {
        Ok(event) => DecodedFrame::Event(event),
        Err(err) => {
            if KNOWN_EVENT_TYPES.contains(&raw.event_type.as_str()) {
                DecodedFrame::Malformed {
                    event_type: raw.event_type,
                    error: err.to_string(),
                }
            } else {
                DecodedFrame::UnknownType {
                    event_type: raw.event_type,
                }
            }
        }
    }
}
