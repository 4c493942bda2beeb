use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use session_core::{PlayerCommand, SessionConfig, SessionController};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::error::RecvError;
use tracing::warn;
use tracing_subscriber::EnvFilter;

mod commands;
mod config;
mod render;

use commands::ParsedLine;

#[derive(Parser, Debug)]
struct Args {
    /// Path to the settings file.
    #[arg(long, default_value = "console.toml")]
    config: PathBuf,
    #[arg(long)]
    server_url: Option<String>,
    #[arg(long)]
    token: Option<String>,
    #[arg(long)]
    scenario: Option<String>,
    #[arg(long)]
    intensity: Option<String>,
    /// Requested run length in minutes.
    #[arg(long)]
    duration: Option<u32>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Logs go to stderr so the transcript on stdout stays readable.
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();
    let args = Args::parse();

    let mut settings = config::load_settings(&args.config);
    if let Some(v) = args.server_url {
        settings.server_url = v;
    }
    if let Some(v) = args.token {
        settings.auth_token = Some(v);
    }
    if let Some(v) = args.scenario {
        settings.scenario = v;
    }
    if let Some(v) = args.intensity {
        settings.intensity = v;
    }
    if let Some(v) = args.duration {
        settings.duration_minutes = v;
    }

    let controller = SessionController::spawn(SessionConfig {
        server_url: settings.server_url,
        auth_token: settings.auth_token,
        scenario: settings.scenario,
        intensity: settings.intensity,
        duration_minutes: settings.duration_minutes,
    });

    let mut intents = controller.subscribe_intents();
    let printer = tokio::spawn(async move {
        let mut screen = render::Screen::default();
        loop {
            match intents.recv().await {
                Ok(intent) => {
                    for line in screen.render(&intent) {
                        println!("{line}");
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "renderer fell behind, some updates were dropped");
                }
                Err(RecvError::Closed) => break,
            }
        }
    });

    println!("Incident simulation console. Type /help for commands.");
    controller.submit(PlayerCommand::Start);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        match commands::parse_line(&line) {
            ParsedLine::Submit(command) => {
                let leaving = matches!(command, PlayerCommand::Exit);
                let delivered = controller.submit(command);
                if leaving || !delivered {
                    break;
                }
            }
            ParsedLine::Help => println!("{}", commands::HELP_TEXT),
            ParsedLine::Empty => {}
            ParsedLine::Invalid { message } => println!("{message}"),
        }
    }

    // EOF on stdin lands here too; the driver still has to stop.
    controller.submit(PlayerCommand::Exit);
    printer.await?;
    Ok(())
}
