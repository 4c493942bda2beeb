use std::{collections::BTreeMap, sync::Arc, time::Duration};

use shared::{
    domain::{AgentAvailability, AgentName, SessionId, SessionPhase, SystemKey},
    protocol::{
        decode_frame, DebriefPayload, DecisionOption, DecodedFrame, InitialStatePayload,
        PerformanceRating, RatingRequest, RatingResponse, StartSessionRequest,
        StartSessionResponse, StreamEvent,
    },
};
use tokio::{
    sync::{broadcast, mpsc},
    task::JoinHandle,
    time,
};
use tracing::{debug, info, warn};

mod clock;
pub mod dispatch;
pub mod error;
pub mod transport;
pub mod types;

pub use types::{ConnectionStatus, PlayerCommand, Session, SurfaceKind, SurfacePrompt, UiIntent};

use crate::{
    clock::{parse_iso_utc, LocalClock, TickOutcome},
    dispatch::{CommandApi, HttpCommandApi},
    error::DispatchError,
    transport::{FrameSink, StreamClose, StreamConnector, StreamHandle, WsConnector},
    types::PendingPrompt,
};

const STREAM_RETRY_DELAY: Duration = Duration::from_millis(1500);
const STREAM_MAX_RETRIES: u32 = 4;
const INTENT_CAPACITY: usize = 1024;

const SYSTEM_SPEAKER: &str = "System";
const IGNORED_CALL_SPEAKER: &str = "Call Ignored";
const IGNORE_CALL_ACTION: &str = "ignore call";

/// Everything the controller needs to reach one backend. The scenario
/// fields feed the start request verbatim.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub server_url: String,
    pub auth_token: Option<String>,
    pub scenario: String,
    pub intensity: String,
    pub duration_minutes: u32,
}

/// One entry on the driver's queue. Commands, stream activity, timers and
/// finished dispatches all funnel through here so the driver task is the
/// only place session state ever changes.
#[derive(Debug)]
pub(crate) enum SessionEvent {
    Command(PlayerCommand),
    StreamOpened { seq: u64, handle: StreamHandle },
    Frame { seq: u64, text: String },
    StreamClosed { seq: u64, close: StreamClose },
    ClockTick { generation: u64 },
    RetryConnect { attempt: u32 },
    Dispatch { epoch: u64, outcome: DispatchOutcome },
}

/// Result of one backend command, delivered back to the driver. The epoch
/// recorded at dispatch time lets the driver drop outcomes that belong to
/// a run that has since been torn down.
#[derive(Debug)]
pub(crate) enum DispatchOutcome {
    Start(Result<StartSessionResponse, DispatchError>),
    Action {
        action: String,
        result: Result<(), DispatchError>,
    },
    Briefing(Result<(), DispatchError>),
    Rating(Result<RatingResponse, DispatchError>),
}

/// Handle to a running session driver. Cheap to clone; all clones feed the
/// same driver task.
#[derive(Clone)]
pub struct SessionController {
    queue: mpsc::UnboundedSender<SessionEvent>,
    intents: broadcast::Sender<UiIntent>,
}

impl SessionController {
    /// Spawns the driver against the real backend. Must be called from
    /// within a tokio runtime.
    pub fn spawn(config: SessionConfig) -> Self {
        let api = Arc::new(HttpCommandApi::new(
            config.server_url.clone(),
            config.auth_token.clone(),
        ));
        Self::spawn_with_dependencies(config, api, Arc::new(WsConnector))
    }

    pub(crate) fn spawn_with_dependencies(
        config: SessionConfig,
        api: Arc<dyn CommandApi>,
        connector: Arc<dyn StreamConnector>,
    ) -> Self {
        let (queue, events) = mpsc::unbounded_channel();
        let (intents, _) = broadcast::channel(INTENT_CAPACITY);
        let runtime = SessionRuntime {
            config,
            api,
            connector,
            queue: queue.clone(),
            events,
            intents: intents.clone(),
            session: Session::default(),
            clock: LocalClock::new(),
            stream: None,
            stream_seq: 0,
            retry_attempts: 0,
            retry_timer: None,
            dispatch_epoch: 0,
        };
        tokio::spawn(runtime.run());
        Self { queue, intents }
    }

    pub fn subscribe_intents(&self) -> broadcast::Receiver<UiIntent> {
        self.intents.subscribe()
    }

    /// Queues one player command. Returns false once the driver has shut
    /// down and the command can no longer be delivered.
    pub fn submit(&self, command: PlayerCommand) -> bool {
        self.queue.send(SessionEvent::Command(command)).is_ok()
    }
}

struct SessionRuntime {
    config: SessionConfig,
    api: Arc<dyn CommandApi>,
    connector: Arc<dyn StreamConnector>,
    queue: mpsc::UnboundedSender<SessionEvent>,
    events: mpsc::UnboundedReceiver<SessionEvent>,
    intents: broadcast::Sender<UiIntent>,
    session: Session,
    clock: LocalClock,
    stream: Option<StreamHandle>,
    stream_seq: u64,
    retry_attempts: u32,
    retry_timer: Option<JoinHandle<()>>,
    dispatch_epoch: u64,
}

impl SessionRuntime {
    async fn run(mut self) {
        while let Some(event) = self.events.recv().await {
            let stop = self.apply(event);
            self.reconcile_input();
            if stop {
                break;
            }
        }
        self.shutdown_stream();
        self.cancel_retry_timer();
        self.clock.stop();
        debug!("session driver stopped");
    }

    fn apply(&mut self, event: SessionEvent) -> bool {
        match event {
            SessionEvent::Command(command) => return self.apply_command(command),
            SessionEvent::StreamOpened { seq, handle } => self.on_stream_opened(seq, handle),
            SessionEvent::Frame { seq, text } => self.on_frame(seq, &text),
            SessionEvent::StreamClosed { seq, close } => self.on_stream_closed(seq, close),
            SessionEvent::ClockTick { generation } => self.on_clock_tick(generation),
            SessionEvent::RetryConnect { attempt } => self.on_retry_due(attempt),
            SessionEvent::Dispatch { epoch, outcome } => self.on_dispatch(epoch, outcome),
        }
        false
    }

    fn apply_command(&mut self, command: PlayerCommand) -> bool {
        match command {
            PlayerCommand::Start => self.start_session(),
            PlayerCommand::FreeText { text } => self.submit_free_text(&text),
            PlayerCommand::Decide { value } => self.submit_decision(value),
            PlayerCommand::Answer { yes } => self.submit_yes_no(yes),
            PlayerCommand::CallAgent { agent } => self.call_agent(&agent),
            PlayerCommand::AnswerCall => self.submit_player_action("answer call".to_string()),
            PlayerCommand::IgnoreCall => {
                self.submit_player_action(IGNORE_CALL_ACTION.to_string())
            }
            PlayerCommand::HangUp => self.hang_up(),
            PlayerCommand::SubmitBriefing { talking_points } => {
                let points = talking_points.trim();
                if !points.is_empty() {
                    self.submit_briefing_form(points.to_string());
                }
            }
            PlayerCommand::SubmitRating { rating, feedback } => {
                self.submit_rating(rating, feedback)
            }
            PlayerCommand::DismissDebrief => self.dismiss_debrief(),
            PlayerCommand::Exit => return true,
        }
        false
    }

    /// The input-enablement rule, re-evaluated after every event: free text
    /// is accepted only in phases that take commands and only while the
    /// stream is open.
    fn reconcile_input(&mut self) {
        let enabled = self.session.phase.allows_input() && self.session.connection_open;
        if enabled != self.session.input_enabled {
            self.session.input_enabled = enabled;
            self.emit(UiIntent::InputEnabled { enabled });
        }
    }

    fn emit(&self, intent: UiIntent) {
        let _ = self.intents.send(intent);
    }

    /// Single choke point for transcript lines. The last submitted command
    /// marker is consumed by whichever message arrives next; the ignored
    /// call echo is the one line it suppresses outright.
    fn append_message(
        &mut self,
        speaker: impl Into<String>,
        body: impl Into<String>,
        notification: Option<String>,
    ) {
        let speaker = speaker.into();
        let marker = self.session.suppress_marker.take();
        if speaker == IGNORED_CALL_SPEAKER && marker.as_deref() == Some(IGNORE_CALL_ACTION) {
            debug!("suppressing ignored-call echo");
            return;
        }
        self.emit(UiIntent::MessageAppended {
            speaker,
            body: body.into(),
            notification,
        });
    }

    fn player_speaker(&self) -> String {
        self.session
            .player_name
            .clone()
            .unwrap_or_else(|| "Player".to_string())
    }

    // ---- player commands ----

    fn start_session(&mut self) {
        if self.session.id.is_some() && !self.session.phase.is_terminal() {
            self.append_message(SYSTEM_SPEAKER, "A simulation is already in progress.", None);
            return;
        }

        // Orphan whatever the previous run left behind before resetting.
        self.dispatch_epoch += 1;
        self.retry_attempts = 0;
        self.cancel_retry_timer();
        self.shutdown_stream();
        self.clock.stop();
        self.retire_surface();
        if self.session.debrief_visible {
            self.session.debrief_visible = false;
            self.emit(UiIntent::DebriefDismissed);
        }
        self.session = Session::default();

        let mode = if self.config.auth_token.is_some() {
            "authenticated"
        } else {
            "guest"
        };
        self.append_message(SYSTEM_SPEAKER, format!("Starting {mode} simulation..."), None);
        self.transition_phase(SessionPhase::Connecting);

        let request = StartSessionRequest {
            scenario: self.config.scenario.clone(),
            intensity: self.config.intensity.clone(),
            duration: self.config.duration_minutes,
        };
        let api = Arc::clone(&self.api);
        let queue = self.queue.clone();
        let epoch = self.dispatch_epoch;
        tokio::spawn(async move {
            let result = api.start_session(&request).await;
            let _ = queue.send(SessionEvent::Dispatch {
                epoch,
                outcome: DispatchOutcome::Start(result),
            });
        });
    }

    fn submit_free_text(&mut self, text: &str) {
        let action = text.trim();
        if action.is_empty() || !self.session.input_enabled {
            debug!("dropping free text while input is disabled");
            return;
        }
        // While the briefing surface is up, typed text is the briefing.
        if matches!(
            self.session.active_surface,
            Some(SurfacePrompt::Briefing { .. })
        ) {
            let speaker = self.player_speaker();
            self.append_message(speaker, action, None);
            self.session.suppress_marker = Some(action.to_lowercase());
            self.retire_surface();
            self.dispatch_briefing(action.to_string());
            return;
        }
        self.submit_player_action(action.to_string());
    }

    fn submit_decision(&mut self, value: String) {
        if !matches!(
            self.session.active_surface,
            Some(SurfacePrompt::Decision { .. })
        ) {
            debug!("decision submitted with no active decision point");
            return;
        }
        self.submit_player_action(value);
    }

    fn submit_yes_no(&mut self, yes: bool) {
        if !matches!(
            self.session.active_surface,
            Some(SurfacePrompt::YesNo { .. })
        ) {
            debug!("yes/no answer with no active prompt");
            return;
        }
        self.submit_player_action(if yes { "yes" } else { "no" }.to_string());
    }

    fn call_agent(&mut self, agent: &AgentName) {
        let blocked = matches!(
            self.session.phase,
            SessionPhase::InConversation | SessionPhase::DecisionPoint | SessionPhase::Ended
        ) || !self.session.input_enabled;
        if blocked {
            let line = format!(
                "Cannot initiate call while in state: {} or input disabled.",
                self.session.phase
            );
            self.append_message(SYSTEM_SPEAKER, line, None);
            return;
        }
        self.submit_player_action(format!("call {agent}"));
    }

    fn hang_up(&mut self) {
        if self.session.phase != SessionPhase::InConversation {
            debug!("hang up outside of a conversation");
            return;
        }
        self.submit_player_action("hang up".to_string());
    }

    /// The one path player actions take to the backend. Echoes the action,
    /// arms the suppression marker and retires whatever surface prompted
    /// the submission.
    fn submit_player_action(&mut self, action: String) {
        let Some(session) = self.session.id.clone() else {
            self.append_message(
                SYSTEM_SPEAKER,
                "Cannot send action: Simulation not properly initialized.",
                None,
            );
            return;
        };
        let speaker = self.player_speaker();
        self.append_message(speaker, action.clone(), None);
        self.session.suppress_marker = Some(action.to_lowercase());
        self.retire_surface();

        let api = Arc::clone(&self.api);
        let queue = self.queue.clone();
        let epoch = self.dispatch_epoch;
        tokio::spawn(async move {
            let result = api.submit_action(&session, &action).await;
            let _ = queue.send(SessionEvent::Dispatch {
                epoch,
                outcome: DispatchOutcome::Action { action, result },
            });
        });
    }

    fn submit_briefing_form(&mut self, points: String) {
        let speaker = self.player_speaker();
        self.append_message(speaker, format!("Briefing submitted: {points}"), None);
        self.append_message(
            SYSTEM_SPEAKER,
            "Analyst briefing points submitted for review.",
            None,
        );
        self.retire_surface();
        self.dispatch_briefing(points);
    }

    fn dispatch_briefing(&mut self, points: String) {
        let Some(session) = self.session.id.clone() else {
            self.append_message(
                SYSTEM_SPEAKER,
                "Error submitting briefing: No active simulation ID.",
                None,
            );
            return;
        };
        let api = Arc::clone(&self.api);
        let queue = self.queue.clone();
        let epoch = self.dispatch_epoch;
        tokio::spawn(async move {
            let result = api.submit_briefing(&session, &points).await;
            let _ = queue.send(SessionEvent::Dispatch {
                epoch,
                outcome: DispatchOutcome::Briefing(result),
            });
        });
    }

    fn submit_rating(&mut self, rating: u8, feedback: Option<String>) {
        let Some(session) = self.session.id.clone() else {
            self.append_message(
                SYSTEM_SPEAKER,
                "Cannot submit rating: no simulation on record.",
                None,
            );
            return;
        };
        if !(1..=5).contains(&rating) {
            self.append_message(SYSTEM_SPEAKER, "Rating must be between 1 and 5.", None);
            return;
        }
        let request = RatingRequest {
            simulation_id: session,
            rating,
            feedback: feedback.filter(|text| !text.trim().is_empty()),
        };
        let api = Arc::clone(&self.api);
        let queue = self.queue.clone();
        let epoch = self.dispatch_epoch;
        tokio::spawn(async move {
            let result = api.submit_rating(&request).await;
            let _ = queue.send(SessionEvent::Dispatch {
                epoch,
                outcome: DispatchOutcome::Rating(result),
            });
        });
    }

    // ---- dispatch outcomes ----

    fn on_dispatch(&mut self, epoch: u64, outcome: DispatchOutcome) {
        if epoch != self.dispatch_epoch {
            debug!("discarding dispatch outcome from a superseded run");
            return;
        }
        match outcome {
            DispatchOutcome::Start(Ok(response)) => {
                info!(session = %response.simulation_id, "simulation started");
                self.session.id = Some(response.simulation_id);
                self.launch_stream();
            }
            DispatchOutcome::Start(Err(err)) => {
                warn!(error = %err, "simulation start failed");
                let mode = if self.config.auth_token.is_some() {
                    ""
                } else {
                    "guest "
                };
                self.append_message(
                    SYSTEM_SPEAKER,
                    format!("Failed to start {mode}simulation. ({err})"),
                    None,
                );
                self.transition_phase(SessionPhase::Setup);
            }
            DispatchOutcome::Action { action, result } => {
                if let Err(err) = result {
                    warn!(error = %err, action = %action, "action dispatch failed");
                    match err {
                        DispatchError::Rejected(rejection) => {
                            self.append_message("Backend Error", rejection.to_string(), None);
                        }
                        DispatchError::Http(_) => {
                            self.append_message(
                                "System Command",
                                format!("Unexpected network error sending action '{action}'."),
                                None,
                            );
                        }
                    }
                }
            }
            DispatchOutcome::Briefing(result) => {
                if let Err(err) = result {
                    warn!(error = %err, "briefing dispatch failed");
                    self.append_message(
                        SYSTEM_SPEAKER,
                        "Error submitting briefing points. Check connection.",
                        None,
                    );
                }
            }
            DispatchOutcome::Rating(result) => match result {
                Ok(response) => {
                    debug!(message = %response.message, "rating accepted");
                    self.append_message(SYSTEM_SPEAKER, "Thank you for your feedback!", None);
                }
                Err(err) => {
                    warn!(error = %err, "rating dispatch failed");
                    self.append_message(
                        SYSTEM_SPEAKER,
                        "Error submitting feedback. Please try again.",
                        None,
                    );
                }
            },
        }
    }

    // ---- stream lifecycle ----

    fn launch_stream(&mut self) {
        let Some(session) = self.session.id.clone() else {
            warn!("stream requested without a session id");
            return;
        };
        self.stream_seq += 1;
        let sink = FrameSink::new(self.queue.clone(), self.stream_seq);
        self.emit(UiIntent::Connection {
            status: ConnectionStatus::Connecting,
        });

        let connector = Arc::clone(&self.connector);
        let base_url = self.config.server_url.clone();
        let auth_token = self.config.auth_token.clone();
        tokio::spawn(async move {
            if let Err(err) = connector
                .open(&base_url, &session, auth_token.as_deref(), sink.clone())
                .await
            {
                warn!(error = %err, "stream connect failed");
                sink.closed(StreamClose {
                    code: None,
                    reason: Some(err.to_string()),
                    was_clean: false,
                });
            }
        });
    }

    /// Closes the live stream, if any. Bumping the sequence also orphans a
    /// connect attempt still in flight, so its late events are dropped.
    fn shutdown_stream(&mut self) {
        self.stream_seq += 1;
        if let Some(handle) = self.stream.take() {
            handle.shutdown();
            self.session.connection_open = false;
            self.emit(UiIntent::Connection {
                status: ConnectionStatus::Closed,
            });
        }
    }

    fn on_stream_opened(&mut self, seq: u64, handle: StreamHandle) {
        if seq != self.stream_seq {
            debug!(seq, "discarding superseded stream open");
            handle.shutdown();
            return;
        }
        info!("event stream open");
        self.stream = Some(handle);
        self.session.connection_open = true;
        self.emit(UiIntent::Connection {
            status: ConnectionStatus::Open,
        });
    }

    fn on_stream_closed(&mut self, seq: u64, close: StreamClose) {
        if seq != self.stream_seq {
            debug!(seq, "discarding superseded stream close");
            return;
        }
        self.clock.stop();
        self.stream = None;
        self.session.connection_open = false;

        if !close.was_clean
            && self.retry_attempts < STREAM_MAX_RETRIES
            && !self.session.phase.is_terminal()
        {
            self.retry_attempts += 1;
            warn!(
                attempt = self.retry_attempts,
                code = ?close.code,
                "stream lost, scheduling reconnect"
            );
            self.emit(UiIntent::Connection {
                status: ConnectionStatus::Retrying {
                    attempt: self.retry_attempts,
                    max_attempts: STREAM_MAX_RETRIES,
                },
            });
            self.schedule_retry();
            return;
        }

        if self.session.phase.is_terminal() {
            self.emit(UiIntent::Connection {
                status: ConnectionStatus::Closed,
            });
            return;
        }

        // No retry left to run: either the peer closed mid-run or the
        // reconnect budget is spent. Both end the session.
        warn!(code = ?close.code, reason = ?close.reason, "stream closed permanently");
        self.emit(UiIntent::Connection {
            status: ConnectionStatus::Failed { code: close.code },
        });
        let code = close
            .code
            .map_or_else(|| "unknown".to_string(), |code| code.to_string());
        self.append_message(
            "WebSocket",
            format!("Connection failed permanently ({code})."),
            None,
        );
        self.session.id = None;
        self.dispatch_epoch += 1;
        self.transition_phase(SessionPhase::Error);
    }

    fn schedule_retry(&mut self) {
        self.cancel_retry_timer();
        let attempt = self.retry_attempts;
        let queue = self.queue.clone();
        self.retry_timer = Some(tokio::spawn(async move {
            time::sleep(STREAM_RETRY_DELAY).await;
            let _ = queue.send(SessionEvent::RetryConnect { attempt });
        }));
    }

    fn cancel_retry_timer(&mut self) {
        if let Some(timer) = self.retry_timer.take() {
            timer.abort();
        }
    }

    fn on_retry_due(&mut self, attempt: u32) {
        if attempt != self.retry_attempts
            || self.session.connection_open
            || self.session.phase.is_terminal()
        {
            debug!(attempt, "discarding stale reconnect timer");
            return;
        }
        if self.session.id.is_none() {
            debug!("reconnect due without a session id");
            return;
        }
        info!(attempt, "reconnecting event stream");
        self.launch_stream();
    }

    fn on_clock_tick(&mut self, generation: u64) {
        match self.clock.apply_tick(generation) {
            TickOutcome::Stale => {}
            TickOutcome::Stopped => {
                warn!("simulation clock stopped on unrepresentable time");
                self.emit(UiIntent::ClockUpdated {
                    sim_time: None,
                    end_time: self.clock.end_time(),
                });
            }
            TickOutcome::Advanced(sim_time) => {
                self.emit(UiIntent::ClockUpdated {
                    sim_time: Some(sim_time),
                    end_time: self.clock.end_time(),
                });
            }
        }
    }

    // ---- stream events ----

    fn on_frame(&mut self, seq: u64, text: &str) {
        if seq != self.stream_seq {
            debug!(seq, "discarding frame from superseded stream");
            return;
        }
        match decode_frame(text) {
            DecodedFrame::Event(event) => self.apply_stream_event(event),
            DecodedFrame::UnknownType { event_type } => {
                debug!(%event_type, "skipping unknown stream event");
            }
            DecodedFrame::Malformed { event_type, error } => {
                warn!(%event_type, %error, "malformed stream event");
                self.append_message(
                    SYSTEM_SPEAKER,
                    "Received unparseable message from server.",
                    None,
                );
            }
        }
    }

    fn apply_stream_event(&mut self, event: StreamEvent) {
        match event {
            StreamEvent::InitialState(payload) => self.on_initial_state(payload),
            StreamEvent::StateChange { new_state } => self.on_state_change(new_state),
            StreamEvent::TimeUpdate {
                sim_time_iso,
                end_time_iso,
            } => self.apply_time_update(sim_time_iso.as_deref(), end_time_iso.as_deref()),
            StreamEvent::IntensityUpdate {
                current_intensity_mod,
                reason,
            } => self.on_intensity_update(current_intensity_mod, reason),
            StreamEvent::SystemStatusUpdate {
                system_key,
                status,
                reason,
            } => self.on_system_status(system_key, status, reason),
            StreamEvent::AgentStatusUpdate { agent_name, state } => {
                self.on_agent_status(agent_name, state)
            }
            StreamEvent::FullStatusUpdate {
                system_status,
                agent_status,
                missed_calls,
            } => self.on_full_status(system_status, agent_status, missed_calls),
            StreamEvent::MissedCallsUpdate { missed_calls } => {
                self.replace_missed_calls(missed_calls)
            }
            StreamEvent::CallWaiting {
                agent_name,
                current_call,
            } => self.on_call_waiting(agent_name, current_call),
            StreamEvent::CallIgnored { agent_name } => {
                debug!(agent = ?agent_name, "ignored call acknowledged");
            }
            StreamEvent::DisplayMessage {
                speaker,
                message,
                notification,
            } => self.on_display_message(speaker, message, notification),
            StreamEvent::AgentThinking { agent_name } => self.emit(UiIntent::AgentThinking {
                agent: agent_name,
                thinking: true,
            }),
            StreamEvent::ConversationStarted { agent_name } => {
                self.on_conversation_started(agent_name)
            }
            StreamEvent::ConversationEnded { agent_name } => {
                self.on_conversation_ended(agent_name)
            }
            StreamEvent::DecisionPointInfo {
                title,
                summary,
                options,
                current_status_dict,
            } => self.on_decision_point(title, summary, options, current_status_dict),
            StreamEvent::RequestYesNo {
                prompt,
                action_context,
            } => self.on_request_yes_no(prompt, action_context),
            StreamEvent::RequestAnalystInput { context_question } => {
                self.show_surface(SurfacePrompt::Briefing { context_question })
            }
            StreamEvent::DebriefInfo(payload) => self.show_debrief(payload),
            StreamEvent::DebriefRatingUpdate {
                simulation_id,
                performance_rating,
            } => self.on_debrief_rating_update(simulation_id, performance_rating),
            StreamEvent::RequestUserRating {} => self.on_request_user_rating(),
            StreamEvent::SimulationEnded {
                message,
                debrief_data,
            } => self.on_simulation_ended(message, debrief_data),
            StreamEvent::ErrorMessage { message } => {
                self.append_message("Backend Error", message, None)
            }
            StreamEvent::LogFeedUpdate(entry) => self.emit(UiIntent::LogFeedAppended(entry)),
        }
    }

    fn on_initial_state(&mut self, payload: InitialStatePayload) {
        info!(session = %payload.simulation_id, "initial state received");
        self.session.id = Some(payload.simulation_id.clone());
        self.session.scenario = payload.scenario.clone();
        self.session.player_name = payload.player_name.clone();
        self.session.player_role = payload.player_role.clone();
        self.session.intensity = payload.current_intensity_mod;
        self.session.agent_in_conversation = None;
        self.session.pending_prompt = None;
        self.session.suppress_marker = None;
        self.retire_surface();
        if self.session.debrief_visible {
            self.session.debrief_visible = false;
            self.emit(UiIntent::DebriefDismissed);
        }

        self.emit(UiIntent::SessionInitialized {
            session: payload.simulation_id,
            scenario: payload.scenario,
            player_name: payload.player_name,
            player_role: payload.player_role,
            intensity: payload.current_intensity_mod,
        });

        self.session.systems = payload.initial_system_status.unwrap_or_default();
        self.emit(UiIntent::SystemBoardReplaced {
            systems: self.session.systems.clone(),
        });
        self.session.agents = payload.initial_agent_status.unwrap_or_default();
        self.emit(UiIntent::AgentBoardReplaced {
            agents: self.session.agents.clone(),
        });
        self.replace_missed_calls(payload.missed_calls);

        self.apply_time_update(
            payload
                .current_sim_time_iso
                .as_deref()
                .or(payload.start_time_iso.as_deref()),
            payload.end_time_iso.as_deref(),
        );

        let role = self
            .session
            .player_role
            .clone()
            .unwrap_or_else(|| "Role".to_string());
        let name = self.player_speaker();
        let scenario = self
            .session
            .scenario
            .clone()
            .unwrap_or_else(|| "Simulation".to_string());
        self.append_message(
            "Simulation Start",
            format!("Welcome, {role} {name}. {scenario} simulation initialized and running."),
            None,
        );

        let mut phase = payload
            .current_state
            .unwrap_or(SessionPhase::AwaitingPlayerChoice);
        if phase == SessionPhase::InConversation && self.session.agent_in_conversation.is_none() {
            warn!("initial state reports a conversation with no agent");
            phase = SessionPhase::AwaitingPlayerChoice;
        }
        self.transition_phase(phase);
    }

    fn on_state_change(&mut self, new_state: SessionPhase) {
        if new_state == SessionPhase::InConversation
            && self.session.agent_in_conversation.is_none()
        {
            warn!("conversation state without a tracked agent, ignoring");
            return;
        }
        self.transition_phase(new_state);
    }

    fn transition_phase(&mut self, next: SessionPhase) {
        if self.session.phase == next {
            return;
        }
        if self.session.phase == SessionPhase::InConversation {
            self.session.agent_in_conversation = None;
        }
        info!(from = %self.session.phase, to = %next, "phase transition");
        self.session.phase = next;
        self.emit(UiIntent::PhaseChanged { phase: next });
        if next.is_terminal() {
            self.cancel_retry_timer();
            self.clock.stop();
        }
    }

    /// Resets the local clock from raw wire timestamps. A missing or
    /// unparseable simulation time stops the clock instead of ticking on
    /// garbage; the server will send a fresh one.
    fn apply_time_update(&mut self, sim_raw: Option<&str>, end_raw: Option<&str>) {
        if let Some(raw) = end_raw {
            match parse_iso_utc(raw) {
                Some(end) => self.clock.set_end_time(Some(end)),
                None => warn!(raw, "unparseable end time"),
            }
        }
        let parsed = sim_raw.and_then(|raw| {
            let parsed = parse_iso_utc(raw);
            if parsed.is_none() {
                warn!(raw, "unparseable simulation time");
            }
            parsed
        });
        self.clock.reset(parsed, &self.queue);
        self.emit(UiIntent::ClockUpdated {
            sim_time: parsed,
            end_time: self.clock.end_time(),
        });
    }

    fn on_intensity_update(&mut self, intensity: f64, reason: Option<String>) {
        self.session.intensity = Some(intensity);
        self.emit(UiIntent::IntensityChanged {
            intensity,
            reason: reason.clone(),
        });
        let reason = reason.unwrap_or_else(|| "Load change".to_string());
        self.append_message(
            "Intensity Shift",
            format!("Intensity updated. Reason: {reason}"),
            None,
        );
    }

    fn on_system_status(&mut self, system: SystemKey, status: String, reason: Option<String>) {
        self.session.systems.insert(system.clone(), status.clone());
        self.emit(UiIntent::SystemStatusChanged {
            system: system.clone(),
            status: status.clone(),
        });
        let mut line = format!("System {system} -> {status}.");
        if let Some(reason) = reason {
            line.push_str(&format!(" Reason: {reason}"));
        }
        self.append_message("Status Change", line, None);
    }

    fn on_agent_status(&mut self, agent: AgentName, state: String) {
        self.session.agents.insert(agent.clone(), state.clone());
        let availability = AgentAvailability::from_wire(&state);
        self.emit(UiIntent::AgentStatusChanged {
            agent,
            availability,
            label: state,
        });
    }

    fn on_full_status(
        &mut self,
        systems: Option<BTreeMap<SystemKey, String>>,
        agents: Option<BTreeMap<AgentName, String>>,
        missed: Option<Vec<AgentName>>,
    ) {
        if let Some(systems) = systems {
            self.session.systems = systems;
            self.emit(UiIntent::SystemBoardReplaced {
                systems: self.session.systems.clone(),
            });
        }
        if let Some(agents) = agents {
            self.session.agents = agents;
            self.emit(UiIntent::AgentBoardReplaced {
                agents: self.session.agents.clone(),
            });
        }
        if let Some(missed) = missed {
            self.replace_missed_calls(missed);
        }
    }

    fn replace_missed_calls(&mut self, missed: Vec<AgentName>) {
        self.session.missed_calls = missed.into_iter().collect();
        self.emit(UiIntent::MissedCallsChanged {
            agents: self.session.missed_calls.clone(),
        });
    }

    fn on_call_waiting(&mut self, agent: AgentName, current_call: Option<String>) {
        let current = current_call
            .clone()
            .unwrap_or_else(|| "None".to_string());
        self.append_message(
            "CALL WAITING",
            format!("{agent} is calling. Current call: {current}."),
            None,
        );
        self.emit(UiIntent::CallWaiting {
            agent,
            current_call,
        });
    }

    fn on_display_message(&mut self, speaker: String, message: String, notification: Option<String>) {
        let speaker_agent = AgentName::from(speaker.as_str());
        let from_agent = self.session.agents.contains_key(&speaker_agent);
        self.append_message(speaker, message, notification);
        if from_agent {
            // A message from an agent supersedes its thinking indicator.
            self.emit(UiIntent::AgentThinking {
                agent: speaker_agent,
                thinking: false,
            });
        }
    }

    fn on_conversation_started(&mut self, agent: AgentName) {
        self.append_message(
            "Conversation",
            format!("Started conversation with {agent}. Use 'hang up' to end."),
            None,
        );
        self.session.agent_in_conversation = Some(agent);
        self.transition_phase(SessionPhase::InConversation);
    }

    fn on_conversation_ended(&mut self, agent: Option<AgentName>) {
        let name = agent
            .or_else(|| self.session.agent_in_conversation.clone())
            .map_or_else(|| "agent".to_string(), |agent| agent.to_string());
        self.append_message("Conversation", format!("Ended conversation with {name}."), None);
        self.session.agent_in_conversation = None;
        if self.session.phase == SessionPhase::InConversation {
            self.transition_phase(SessionPhase::AwaitingPlayerChoice);
        }
    }

    fn on_decision_point(
        &mut self,
        title: Option<String>,
        summary: Option<String>,
        options: Vec<DecisionOption>,
        status: Option<BTreeMap<SystemKey, String>>,
    ) {
        if let Some(systems) = status {
            self.session.systems = systems;
            self.emit(UiIntent::SystemBoardReplaced {
                systems: self.session.systems.clone(),
            });
        }
        self.show_surface(SurfacePrompt::Decision {
            title,
            summary,
            options,
        });
        self.transition_phase(SessionPhase::DecisionPoint);
    }

    fn on_request_yes_no(&mut self, prompt: String, action_context: Option<String>) {
        if self.session.debrief_visible {
            // A yes/no prompt always claims the parked slot.
            self.session.pending_prompt = Some(PendingPrompt::YesNo {
                prompt,
                action_context,
            });
            return;
        }
        self.show_surface(SurfacePrompt::YesNo {
            prompt,
            action_context,
        });
    }

    fn show_debrief(&mut self, payload: DebriefPayload) {
        self.session.debrief_visible = true;
        self.emit(UiIntent::DebriefShown(payload));
    }

    fn on_debrief_rating_update(
        &mut self,
        simulation_id: Option<SessionId>,
        rating: Option<PerformanceRating>,
    ) {
        if let (Some(update_id), Some(current)) = (&simulation_id, &self.session.id) {
            if update_id != current {
                debug!(update = %update_id, "rating update for a different run, discarding");
                return;
            }
        }
        let Some(rating) = rating else {
            debug!("rating update without a rating payload");
            return;
        };
        let payload = DebriefPayload {
            performance_rating: Some(rating),
            ..DebriefPayload::default()
        };
        if self.session.debrief_visible {
            if matches!(self.session.pending_prompt, Some(PendingPrompt::YesNo { .. })) {
                debug!("yes/no prompt already parked, dropping rating update");
                return;
            }
            self.session.pending_prompt = Some(PendingPrompt::RatingUpdate(payload));
            self.append_message(
                SYSTEM_SPEAKER,
                "Updated ratings available after closing.",
                None,
            );
            return;
        }
        self.show_debrief(payload);
    }

    fn on_request_user_rating(&mut self) {
        if !self.session.debrief_visible {
            let payload = match self.session.pending_prompt.take() {
                Some(PendingPrompt::RatingUpdate(payload)) => payload,
                other => {
                    self.session.pending_prompt = other;
                    DebriefPayload::default()
                }
            };
            self.show_debrief(payload);
        }
        self.emit(UiIntent::RatingRequested);
    }

    fn dismiss_debrief(&mut self) {
        if !self.session.debrief_visible {
            debug!("dismiss with no debrief visible");
            return;
        }
        self.session.debrief_visible = false;
        self.emit(UiIntent::DebriefDismissed);
        match self.session.pending_prompt.take() {
            Some(PendingPrompt::YesNo {
                prompt,
                action_context,
            }) => self.show_surface(SurfacePrompt::YesNo {
                prompt,
                action_context,
            }),
            Some(PendingPrompt::RatingUpdate(payload)) => self.show_debrief(payload),
            None => {}
        }
    }

    fn on_simulation_ended(&mut self, message: Option<String>, debrief: Option<DebriefPayload>) {
        let message = message.unwrap_or_else(|| "Simulation Complete.".to_string());
        self.append_message("Simulation End", message, None);
        self.retire_surface();
        self.transition_phase(SessionPhase::Ended);
        if let Some(data) = debrief {
            if !self.session.debrief_visible {
                self.show_debrief(data);
            }
        }
        self.emit(UiIntent::SessionEnded);
        // The session id is kept so a rating can still be submitted.
        self.shutdown_stream();
    }

    // ---- surfaces ----

    fn retire_surface(&mut self) {
        if self.session.active_surface.take().is_some() {
            self.emit(UiIntent::SurfaceCleared);
        }
    }

    fn show_surface(&mut self, prompt: SurfacePrompt) {
        self.session.active_surface = Some(prompt.clone());
        self.emit(UiIntent::SurfaceShown(prompt));
    }
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
