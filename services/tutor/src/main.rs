//! Main Entrypoint for the Lingua Tutor
//!
//! This binary is responsible for:
//! 1. Loading configuration from the environment and command line.
//! 2. Initializing logging on stderr, leaving stdout to the lesson.
//! 3. Building the lesson session from the configured metadata.
//! 4. Running it as an MCP tool server, an interactive console, or printing
//!    the model instructions.

use anyhow::Context;
use chrono::Utc;
use clap::{Parser, Subcommand};
use lingua_core::Command;
use lingua_core::agent::LessonService;
use lingua_core::clock::Clock;
use lingua_core::instructions;
use lingua_core::session::LessonSession;
use lingua_service::config::Config;
use lingua_service::driver::{ConsoleSpeaker, LessonDriver};
use rmcp::ServiceExt;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::BufReader;
use tokio::sync::{Mutex, mpsc};
use tracing::info;

#[derive(Parser, Debug)]
#[command(version, about = "Language lesson tutor")]
struct Cli {
    /// Lesson metadata JSON file; overrides LESSON_PATH.
    #[arg(long, global = true)]
    lesson: Option<PathBuf>,

    #[command(subcommand)]
    mode: Mode,
}

#[derive(Subcommand, Debug)]
enum Mode {
    /// Serve the lesson tools over stdio for a conversational model.
    Serve,
    /// Run the lesson interactively, one utterance per line.
    Repl,
    /// Print the instructions for the conversational model.
    Instructions,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // --- 1. Load Configuration ---
    let mut config = Config::from_env().context("Failed to load configuration")?;
    if let Some(path) = cli.lesson {
        config.lesson_path = Some(path);
    }

    // --- 2. Initialize Logging ---
    tracing_subscriber::fmt()
        .with_max_level(config.log_level)
        .with_timer(tracing_subscriber::fmt::time::ChronoLocal::rfc_3339())
        .with_writer(std::io::stderr)
        .init();
    info!("Configuration loaded. Preparing lesson...");

    // --- 3. Build the Session ---
    let metadata = config.lesson_metadata();
    let session =
        LessonSession::from_metadata(metadata.as_deref()).with_advance_delay(config.advance_delay);
    info!(
        title = %session.catalog().title(),
        phrases = session.catalog().phrases().len(),
        "Lesson loaded"
    );

    // --- 4. Run ---
    match cli.mode {
        Mode::Instructions => {
            println!("{}", instructions::build(session.catalog()));
        }
        Mode::Repl => {
            let driver =
                LessonDriver::new(session, ConsoleSpeaker, Clock::System, config.tick_interval);
            let report = driver
                .run(BufReader::new(tokio::io::stdin()))
                .await
                .context("Lesson driver failed")?;
            info!(passed = report.passed, "Lesson finished");
        }
        Mode::Serve => serve(session).await?,
    }

    Ok(())
}

async fn serve(mut session: LessonSession) -> anyhow::Result<()> {
    let greeting = session.start(Utc::now());
    let (tx, mut rx) = mpsc::channel::<Command>(32);

    // Scheduled follow-ups land here; the model picks up their text through
    // get_lesson_status, so they are only logged.
    let log_task = tokio::spawn(async move {
        while let Some(command) = rx.recv().await {
            match command {
                Command::SpeakText(text) => info!(%text, "Lesson output"),
                Command::SessionComplete(report) => {
                    info!(passed = report.passed, "Lesson report ready")
                }
                other => info!(command = ?other, "Lesson event"),
            }
        }
    });
    for command in greeting {
        tx.send(command).await.context("Command channel closed")?;
    }

    let service = LessonService::new(Arc::new(Mutex::new(session)), Some(tx), Clock::System);
    info!("Serving lesson tools on stdio");
    let running = service
        .serve(rmcp::transport::stdio())
        .await
        .context("Failed to start MCP server")?;
    let reason = running.waiting().await.context("MCP server task failed")?;
    info!(?reason, "MCP server stopped");

    log_task.abort();
    Ok(())
}
