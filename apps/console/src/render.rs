use session_core::{ConnectionStatus, SurfaceKind, SurfacePrompt, UiIntent};
use shared::{
    domain::AgentAvailability,
    protocol::{DebriefPayload, PerformanceRating},
};

/// Line-oriented view of the session. Holds just enough state to avoid
/// repeating itself: the clock prints once per simulated minute, a cleared
/// surface is named by the kind that was up, and an empty missed-call set
/// only prints when it clears earlier entries.
#[derive(Default)]
pub struct Screen {
    last_minute: Option<String>,
    surface: Option<SurfaceKind>,
    had_missed: bool,
}

impl Screen {
    pub fn render(&mut self, intent: &UiIntent) -> Vec<String> {
        match intent {
            UiIntent::SessionInitialized {
                session,
                scenario,
                player_name,
                player_role,
                intensity,
            } => {
                let mut lines = vec![
                    format!("=== {} ===", scenario.as_deref().unwrap_or("Simulation")),
                    format!(
                        "Session {session} | {} as {}",
                        player_name.as_deref().unwrap_or("Player"),
                        player_role.as_deref().unwrap_or("Role"),
                    ),
                ];
                if let Some(intensity) = intensity {
                    lines.push(format!("Intensity x{intensity:.2}"));
                }
                lines
            }
            UiIntent::PhaseChanged { phase } => vec![format!("[phase] {phase}")],
            UiIntent::InputEnabled { enabled } => {
                if *enabled {
                    vec!["[input] ready".to_string()]
                } else {
                    vec!["[input] locked".to_string()]
                }
            }
            UiIntent::Connection { status } => vec![match status {
                ConnectionStatus::Connecting => "[link] connecting...".to_string(),
                ConnectionStatus::Open => "[link] connected".to_string(),
                ConnectionStatus::Retrying {
                    attempt,
                    max_attempts,
                } => format!("[link] lost, retry {attempt}/{max_attempts}"),
                ConnectionStatus::Closed => "[link] closed".to_string(),
                ConnectionStatus::Failed { code: Some(code) } => {
                    format!("[link] failed (close code {code})")
                }
                ConnectionStatus::Failed { code: None } => "[link] failed".to_string(),
            }],
            UiIntent::MessageAppended {
                speaker,
                body,
                notification,
            } => {
                let mut lines = vec![format!("{speaker}: {body}")];
                if let Some(note) = notification {
                    lines.push(format!("  [!] {note}"));
                }
                lines
            }
            UiIntent::ClockUpdated { sim_time, end_time } => match sim_time {
                Some(time) => {
                    let stamp = time.format("%H:%M").to_string();
                    if self.last_minute.as_deref() == Some(stamp.as_str()) {
                        return Vec::new();
                    }
                    let line = match end_time {
                        Some(end) => format!("[clock] {stamp} (ends {})", end.format("%H:%M")),
                        None => format!("[clock] {stamp}"),
                    };
                    self.last_minute = Some(stamp);
                    vec![line]
                }
                None => {
                    self.last_minute = None;
                    vec!["[clock] --:--".to_string()]
                }
            },
            UiIntent::IntensityChanged { intensity, reason } => {
                let mut line = format!("[intensity] x{intensity:.2}");
                if let Some(reason) = reason {
                    line.push_str(&format!(" ({reason})"));
                }
                vec![line]
            }
            UiIntent::SystemStatusChanged { system, status } => {
                vec![format!("[system] {system}: {status}")]
            }
            UiIntent::SystemBoardReplaced { systems } => {
                if systems.is_empty() {
                    return vec!["[systems] (none reported)".to_string()];
                }
                let mut lines = vec!["[systems]".to_string()];
                for (system, status) in systems {
                    lines.push(format!("  {system}: {status}"));
                }
                lines
            }
            UiIntent::AgentStatusChanged {
                agent,
                availability,
                label,
            } => vec![format!(
                "[agent] {agent}: {} ({label})",
                availability_label(availability)
            )],
            UiIntent::AgentBoardReplaced { agents } => {
                if agents.is_empty() {
                    return vec!["[agents] (none reported)".to_string()];
                }
                let mut lines = vec!["[agents]".to_string()];
                for (agent, state) in agents {
                    lines.push(format!("  {agent}: {state}"));
                }
                lines
            }
            UiIntent::MissedCallsChanged { agents } => {
                if agents.is_empty() {
                    if !self.had_missed {
                        return Vec::new();
                    }
                    self.had_missed = false;
                    return vec!["[missed calls] cleared".to_string()];
                }
                self.had_missed = true;
                let names: Vec<&str> = agents.iter().map(|agent| agent.as_str()).collect();
                vec![format!("[missed calls] {}", names.join(", "))]
            }
            UiIntent::AgentThinking { agent, thinking } => {
                if *thinking {
                    vec![format!("... {agent} is thinking")]
                } else {
                    Vec::new()
                }
            }
            UiIntent::CallWaiting { agent, .. } => {
                vec![format!("[call] {agent} is calling (/answer or /ignore)")]
            }
            UiIntent::SurfaceShown(prompt) => {
                self.surface = Some(prompt.kind());
                match prompt {
                    SurfacePrompt::Decision {
                        title,
                        summary,
                        options,
                    } => {
                        let mut lines = vec![format!(
                            "--- {} ---",
                            title.as_deref().unwrap_or("Decision Point")
                        )];
                        if let Some(summary) = summary {
                            lines.push(summary.clone());
                        }
                        for option in options {
                            lines.push(format!("  [{}] {}", option.value, option.label));
                        }
                        lines.push("Choose with /decide <value>".to_string());
                        lines
                    }
                    SurfacePrompt::YesNo {
                        prompt,
                        action_context,
                    } => {
                        let mut lines = vec![format!("? {prompt}")];
                        if let Some(context) = action_context {
                            lines.push(format!("  ({context})"));
                        }
                        lines.push("Answer /yes or /no".to_string());
                        lines
                    }
                    SurfacePrompt::Briefing { context_question } => vec![
                        context_question
                            .clone()
                            .unwrap_or_else(|| "Provide your briefing talking points.".to_string()),
                        "Type your briefing, or use /brief <text>".to_string(),
                    ],
                }
            }
            UiIntent::SurfaceCleared => match self.surface.take() {
                Some(SurfaceKind::Decision) => vec!["[decision point closed]".to_string()],
                Some(SurfaceKind::YesNo) => vec!["[prompt closed]".to_string()],
                Some(SurfaceKind::Briefing) => vec!["[briefing closed]".to_string()],
                None => Vec::new(),
            },
            UiIntent::DebriefShown(payload) => render_debrief(payload),
            UiIntent::DebriefDismissed => vec!["[debrief closed]".to_string()],
            UiIntent::RatingRequested => {
                vec!["Rate this run: /rate <1-5> [feedback]".to_string()]
            }
            UiIntent::LogFeedAppended(entry) => {
                let severity = entry.severity.as_deref().unwrap_or("INFO");
                let source = entry.source.as_deref().unwrap_or("feed");
                vec![format!("[feed] {severity} {source}: {}", entry.message)]
            }
            UiIntent::SessionEnded => vec![
                "[simulation over] /rate it, /dismiss the debrief, /start a new run, or /quit"
                    .to_string(),
            ],
        }
    }
}

fn availability_label(availability: &AgentAvailability) -> &'static str {
    match availability {
        AgentAvailability::Available => "available",
        AgentAvailability::Ringing => "ringing",
        AgentAvailability::InCall => "on a call",
        AgentAvailability::Unavailable => "unavailable",
    }
}

fn render_debrief(payload: &DebriefPayload) -> Vec<String> {
    let mut lines = vec![format!(
        "=== {} ===",
        payload.title.as_deref().unwrap_or("Debrief")
    )];
    if let Some(report) = &payload.final_status_report {
        for line in report.lines() {
            lines.push(line.to_string());
        }
    }
    for point in &payload.summary_points {
        lines.push(format!("  - {point}"));
    }
    if let Some(rating) = &payload.performance_rating {
        lines.extend(render_rating(rating));
    }
    lines.push("(/dismiss to close)".to_string());
    lines
}

fn render_rating(rating: &PerformanceRating) -> Vec<String> {
    if let Some(error) = &rating.error {
        return vec![format!("Performance rating unavailable: {error}")];
    }
    let mut lines = Vec::new();
    if let Some(score) = rating.overall_score {
        lines.push(format!("Overall score: {score}"));
    }
    let parts = [
        ("Timeliness", rating.timeliness_score),
        ("Contact strategy", rating.contact_strategy_score),
        ("Decision quality", rating.decision_quality_score),
        ("Efficiency", rating.efficiency_score),
    ];
    for (label, score) in parts {
        if let Some(score) = score {
            lines.push(format!("  {label}: {score}"));
        }
    }
    if let Some(feedback) = &rating.qualitative_feedback {
        lines.push(format!("  \"{feedback}\""));
    }
    lines
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};
    use shared::{domain::AgentName, protocol::DecisionOption};

    use super::*;

    #[test]
    fn clock_prints_once_per_simulated_minute() {
        let mut screen = Screen::default();
        let base = Utc.with_ymd_and_hms(2026, 3, 1, 14, 5, 10).single().expect("timestamp");

        let first = screen.render(&UiIntent::ClockUpdated {
            sim_time: Some(base),
            end_time: None,
        });
        assert_eq!(first, vec!["[clock] 14:05".to_string()]);

        let same_minute = screen.render(&UiIntent::ClockUpdated {
            sim_time: Some(base + chrono::Duration::seconds(20)),
            end_time: None,
        });
        assert!(same_minute.is_empty());

        let next_minute = screen.render(&UiIntent::ClockUpdated {
            sim_time: Some(base + chrono::Duration::seconds(60)),
            end_time: None,
        });
        assert_eq!(next_minute, vec!["[clock] 14:06".to_string()]);
    }

    #[test]
    fn stopped_clock_prints_placeholder_and_forgets_minute() {
        let mut screen = Screen::default();
        let base = Utc.with_ymd_and_hms(2026, 3, 1, 14, 5, 0).single().expect("timestamp");

        screen.render(&UiIntent::ClockUpdated {
            sim_time: Some(base),
            end_time: None,
        });
        let stopped = screen.render(&UiIntent::ClockUpdated {
            sim_time: None,
            end_time: None,
        });
        assert_eq!(stopped, vec!["[clock] --:--".to_string()]);

        // Same minute prints again after a stop.
        let resumed = screen.render(&UiIntent::ClockUpdated {
            sim_time: Some(base),
            end_time: None,
        });
        assert_eq!(resumed, vec!["[clock] 14:05".to_string()]);
    }

    #[test]
    fn cleared_surface_is_named_by_kind() {
        let mut screen = Screen::default();
        screen.render(&UiIntent::SurfaceShown(SurfacePrompt::YesNo {
            prompt: "Prepare a briefing?".to_string(),
            action_context: None,
        }));
        assert_eq!(
            screen.render(&UiIntent::SurfaceCleared),
            vec!["[prompt closed]".to_string()]
        );
        // A second clear has nothing to name.
        assert!(screen.render(&UiIntent::SurfaceCleared).is_empty());
    }

    #[test]
    fn decision_surface_lists_options_with_values() {
        let mut screen = Screen::default();
        let lines = screen.render(&UiIntent::SurfaceShown(SurfacePrompt::Decision {
            title: Some("Shutdown Decision".to_string()),
            summary: Some("Gamma-7 is saturated.".to_string()),
            options: vec![
                DecisionOption {
                    value: "isolate segment gamma7".to_string(),
                    label: "Isolate Gamma-7".to_string(),
                },
                DecisionOption {
                    value: "hold".to_string(),
                    label: "Hold Position".to_string(),
                },
            ],
        }));
        assert!(lines.iter().any(|l| l.contains("Shutdown Decision")));
        assert!(lines
            .iter()
            .any(|l| l.contains("[isolate segment gamma7] Isolate Gamma-7")));
        assert!(lines.iter().any(|l| l.contains("/decide")));
    }

    #[test]
    fn missed_calls_print_only_when_present_or_clearing() {
        let mut screen = Screen::default();
        let empty = screen.render(&UiIntent::MissedCallsChanged {
            agents: Default::default(),
        });
        assert!(empty.is_empty());

        let mut agents = std::collections::BTreeSet::new();
        agents.insert(AgentName::from("Hao Wang"));
        agents.insert(AgentName::from("Paul Kahn"));
        let listed = screen.render(&UiIntent::MissedCallsChanged { agents });
        assert_eq!(listed, vec!["[missed calls] Hao Wang, Paul Kahn".to_string()]);

        let cleared = screen.render(&UiIntent::MissedCallsChanged {
            agents: Default::default(),
        });
        assert_eq!(cleared, vec!["[missed calls] cleared".to_string()]);
    }

    #[test]
    fn debrief_renders_report_points_and_rating() {
        let payload = DebriefPayload {
            title: Some("Run Complete".to_string()),
            final_status_report: Some("Auth_System: RESTORED\nFile_Servers: ENCRYPTED".to_string()),
            summary_points: vec!["Contained the breach late.".to_string()],
            performance_rating: Some(PerformanceRating {
                overall_score: Some(72),
                timeliness_score: Some(60),
                qualitative_feedback: Some("Slow to isolate.".to_string()),
                ..PerformanceRating::default()
            }),
        };
        let lines = render_debrief(&payload);
        assert!(lines.iter().any(|l| l.contains("Run Complete")));
        assert!(lines.iter().any(|l| l == "Auth_System: RESTORED"));
        assert!(lines.iter().any(|l| l.contains("Contained the breach late")));
        assert!(lines.iter().any(|l| l.contains("Overall score: 72")));
        assert!(lines.iter().any(|l| l.contains("Timeliness: 60")));
        assert!(lines.last().is_some_and(|l| l.contains("/dismiss")));
    }

    #[test]
    fn rating_error_replaces_scores() {
        let lines = render_rating(&PerformanceRating {
            overall_score: Some(10),
            error: Some("rating generation failed".to_string()),
            ..PerformanceRating::default()
        });
        assert_eq!(lines.len(), 1);
        assert!(lines[0].contains("rating generation failed"));
    }
}
