use session_core::PlayerCommand;
use shared::domain::AgentName;

pub const HELP_TEXT: &str = "\
Commands:
  <text>                  send a free-text action to the simulation
  /call <agent>           call an agent by name
  /answer                 answer a waiting call
  /ignore                 ignore a waiting call
  /hangup                 end the current conversation
  /decide <value>         choose an option at a decision point
  /yes, /no               answer the active yes/no prompt
  /brief <text>           submit analyst briefing talking points
  /rate <1-5> [feedback]  rate the run once asked
  /dismiss                close the debrief overlay
  /start                  start a fresh run after this one ends
  /help                   show this list
  /quit                   exit";

/// One line of player input. Anything that is not a slash command goes to
/// the backend verbatim as a free-text action.
#[derive(Debug)]
pub enum ParsedLine {
    Submit(PlayerCommand),
    Help,
    Empty,
    Invalid { message: String },
}

pub fn parse_line(line: &str) -> ParsedLine {
    let line = line.trim();
    if line.is_empty() {
        return ParsedLine::Empty;
    }
    let Some(rest) = line.strip_prefix('/') else {
        return ParsedLine::Submit(PlayerCommand::FreeText {
            text: line.to_string(),
        });
    };
    let (word, arg) = match rest.split_once(char::is_whitespace) {
        Some((word, arg)) => (word, arg.trim()),
        None => (rest, ""),
    };
    match word.to_ascii_lowercase().as_str() {
        "start" => ParsedLine::Submit(PlayerCommand::Start),
        "decide" if !arg.is_empty() => ParsedLine::Submit(PlayerCommand::Decide {
            value: arg.to_string(),
        }),
        "decide" => usage("/decide <option value>"),
        "yes" => ParsedLine::Submit(PlayerCommand::Answer { yes: true }),
        "no" => ParsedLine::Submit(PlayerCommand::Answer { yes: false }),
        "call" if !arg.is_empty() => ParsedLine::Submit(PlayerCommand::CallAgent {
            agent: AgentName::from(arg),
        }),
        "call" => usage("/call <agent name>"),
        "answer" => ParsedLine::Submit(PlayerCommand::AnswerCall),
        "ignore" => ParsedLine::Submit(PlayerCommand::IgnoreCall),
        "hangup" => ParsedLine::Submit(PlayerCommand::HangUp),
        "brief" if !arg.is_empty() => ParsedLine::Submit(PlayerCommand::SubmitBriefing {
            talking_points: arg.to_string(),
        }),
        "brief" => usage("/brief <talking points>"),
        "rate" => parse_rate(arg),
        "dismiss" => ParsedLine::Submit(PlayerCommand::DismissDebrief),
        "quit" | "exit" => ParsedLine::Submit(PlayerCommand::Exit),
        "help" => ParsedLine::Help,
        other => ParsedLine::Invalid {
            message: format!("Unknown command '/{other}'. Try /help."),
        },
    }
}

fn parse_rate(arg: &str) -> ParsedLine {
    let (stars, feedback) = match arg.split_once(char::is_whitespace) {
        Some((stars, feedback)) => (stars, Some(feedback.trim().to_string())),
        None => (arg, None),
    };
    match stars.parse::<u8>() {
        Ok(rating @ 1..=5) => ParsedLine::Submit(PlayerCommand::SubmitRating {
            rating,
            feedback: feedback.filter(|text| !text.is_empty()),
        }),
        _ => usage("/rate <1-5> [feedback]"),
    }
}

fn usage(usage: &str) -> ParsedLine {
    ParsedLine::Invalid {
        message: format!("Usage: {usage}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_text_is_a_free_action() {
        match parse_line("  check firewall logs  ") {
            ParsedLine::Submit(PlayerCommand::FreeText { text }) => {
                assert_eq!(text, "check firewall logs");
            }
            other => panic!("unexpected parse: {other:?}"),
        }
    }

    #[test]
    fn call_takes_a_multi_word_agent_name() {
        match parse_line("/call Hao Wang") {
            ParsedLine::Submit(PlayerCommand::CallAgent { agent }) => {
                assert_eq!(agent.as_str(), "Hao Wang");
            }
            other => panic!("unexpected parse: {other:?}"),
        }
        assert!(matches!(parse_line("/call"), ParsedLine::Invalid { .. }));
    }

    #[test]
    fn rate_splits_stars_from_feedback() {
        match parse_line("/rate 4 tight run overall") {
            ParsedLine::Submit(PlayerCommand::SubmitRating { rating, feedback }) => {
                assert_eq!(rating, 4);
                assert_eq!(feedback.as_deref(), Some("tight run overall"));
            }
            other => panic!("unexpected parse: {other:?}"),
        }
        match parse_line("/rate 5") {
            ParsedLine::Submit(PlayerCommand::SubmitRating { rating, feedback }) => {
                assert_eq!(rating, 5);
                assert!(feedback.is_none());
            }
            other => panic!("unexpected parse: {other:?}"),
        }
    }

    #[test]
    fn rate_rejects_out_of_range_stars() {
        assert!(matches!(parse_line("/rate 0"), ParsedLine::Invalid { .. }));
        assert!(matches!(parse_line("/rate 9"), ParsedLine::Invalid { .. }));
        assert!(matches!(parse_line("/rate soon"), ParsedLine::Invalid { .. }));
    }

    #[test]
    fn yes_no_and_shortcuts_parse() {
        assert!(matches!(
            parse_line("/yes"),
            ParsedLine::Submit(PlayerCommand::Answer { yes: true })
        ));
        assert!(matches!(
            parse_line("/no"),
            ParsedLine::Submit(PlayerCommand::Answer { yes: false })
        ));
        assert!(matches!(
            parse_line("/hangup"),
            ParsedLine::Submit(PlayerCommand::HangUp)
        ));
        assert!(matches!(
            parse_line("/ignore"),
            ParsedLine::Submit(PlayerCommand::IgnoreCall)
        ));
    }

    #[test]
    fn unknown_command_names_itself() {
        match parse_line("/frobnicate now") {
            ParsedLine::Invalid { message } => assert!(message.contains("/frobnicate")),
            other => panic!("unexpected parse: {other:?}"),
        }
    }

    #[test]
    fn blank_lines_are_ignored() {
        assert!(matches!(parse_line("   "), ParsedLine::Empty));
        assert!(matches!(parse_line(""), ParsedLine::Empty));
    }
}
