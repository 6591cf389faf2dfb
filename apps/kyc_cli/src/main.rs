use std::{path::PathBuf, sync::Arc};

use anyhow::{Context, Result};
use clap::Parser;
use client_core::{
    load_settings, HttpTransport, KycSession, PendingFile, SessionConfig, SessionError,
};
use shared::domain::{ActionKind, Role, StageStatus, UserId, VerificationOutcome};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
struct Args {
    /// Overrides the configured API base url.
    #[arg(long)]
    api_url: Option<String>,
    #[arg(long)]
    user_id: String,
}

#[derive(Debug, PartialEq, Eq)]
enum Command {
    Say(String),
    Upload {
        path: PathBuf,
        document_type: Option<String>,
    },
    Approve,
    Confirm,
    Status,
    Reset,
    Help,
    Quit,
}

impl Command {
    fn parse(line: &str) -> Command {
        let line = line.trim();
        let Some(rest) = line.strip_prefix('/') else {
            return Command::Say(line.to_string());
        };
        let mut words = rest.split_whitespace();
        match words.next().unwrap_or_default() {
            "upload" => match words.next() {
                Some(path) => Command::Upload {
                    path: PathBuf::from(path),
                    document_type: words.next().map(str::to_string),
                },
                None => Command::Help,
            },
            "approve" => Command::Approve,
            "confirm" => Command::Confirm,
            "status" => Command::Status,
            "reset" => Command::Reset,
            "quit" | "exit" => Command::Quit,
            _ => Command::Help,
        }
    }
}

fn print_help() {
    println!("commands: /upload <path> [type], /approve, /confirm, /status, /reset, /quit");
    println!("anything else is sent to the assistant");
}

fn outcome_label(outcome: VerificationOutcome) -> &'static str {
    match outcome {
        VerificationOutcome::Approved => "approved",
        VerificationOutcome::Rejected => "rejected",
        VerificationOutcome::ManualReview => "under manual review",
        VerificationOutcome::InProgress => "in progress",
    }
}

async fn print_new_messages(session: &KycSession, already_printed: usize) -> usize {
    let state = session.state().await;
    for message in state.messages.iter().skip(already_printed) {
        let who = match message.role {
            Role::User => "you",
            Role::Assistant => "assistant",
            Role::System => "system",
        };
        if !message.content.is_empty() {
            println!("{who}> {}", message.content);
        }
        if let Some(action) = &message.action {
            println!(
                "  [{:?}] {}: {}",
                action.action_type(),
                action.title,
                action.display_description()
            );
            if let ActionKind::VerificationProgress { data } = &action.kind {
                let outcome = outcome_label(data.outcome());
                match &data.failure_reason {
                    Some(reason) => println!("  verification {outcome}: {reason}"),
                    None => println!("  verification {outcome}"),
                }
            }
        }
    }
    state.messages.len()
}

async fn print_stages(session: &KycSession) {
    for stage in session.stages().await {
        let marker = match stage.status {
            StageStatus::Pending => " ",
            StageStatus::InProgress => ">",
            StageStatus::Completed => "x",
            StageStatus::Failed => "!",
        };
        match &stage.message {
            Some(message) => println!("[{marker}] {} ({message})", stage.label()),
            None => println!("[{marker}] {}", stage.label()),
        }
    }
    if let Some(verdict) = session.state().await.verdict {
        println!("verdict: {verdict:?}");
    }
}

async fn pending_file(path: PathBuf, document_type: Option<String>) -> Result<PendingFile> {
    let bytes = tokio::fs::read(&path)
        .await
        .with_context(|| format!("failed to read {}", path.display()))?;
    let filename = path
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or("document.bin")
        .to_string();
    let mut file = PendingFile::new(filename, bytes);
    if let Some(mime_type) = mime_guess::from_path(&path).first_raw() {
        file = file.with_mime_type(mime_type);
    }
    if let Some(document_type) = document_type {
        file = file.with_document_type(document_type);
    }
    Ok(file)
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();
    let args = Args::parse();

    let mut settings = load_settings();
    if let Some(api_url) = args.api_url {
        settings.api_base_url = api_url;
    }
    settings.api_base()?;
    info!(api_base_url = %settings.api_base_url, "kyc_cli: starting");

    let transport = Arc::new(HttpTransport::from_settings(&settings)?);
    let session = KycSession::new(transport, SessionConfig::from(&settings));
    let user_id = UserId::from(args.user_id);
    let session_id = session.init_session(user_id.clone()).await;
    println!("session {session_id}");

    session.start_verification().await?;
    let mut printed = print_new_messages(&session, 0).await;
    print_help();

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let outcome = match Command::parse(&line) {
            Command::Say(text) if text.is_empty() => Ok(()),
            Command::Say(text) => session.send_message(&text, Vec::new(), Vec::new()).await,
            Command::Upload {
                path,
                document_type,
            } => {
                match pending_file(path, document_type).await {
                    Ok(file) => {
                        println!("queued {} (send with /approve)", file.filename);
                        session.add_pending_file(file).await;
                    }
                    Err(err) => eprintln!("{err:#}"),
                }
                Ok(())
            }
            Command::Approve => session.approve_action().await,
            Command::Confirm => session.confirm_action().await,
            Command::Status => {
                match session.refresh_status().await {
                    Ok(false) => println!("no snapshot available"),
                    Ok(true) | Err(SessionError::NoApplication) => {}
                    Err(err) => eprintln!("{err}"),
                }
                print_stages(&session).await;
                Ok(())
            }
            Command::Reset => {
                session.reset().await;
                printed = 0;
                let session_id = session.init_session(user_id.clone()).await;
                println!("session {session_id}");
                session.start_verification().await
            }
            Command::Help => {
                print_help();
                Ok(())
            }
            Command::Quit => break,
        };
        if let Err(err) = outcome {
            eprintln!("{err}");
        }
        printed = print_new_messages(&session, printed).await;
    }

    session.reset().await;
    Ok(())
}
