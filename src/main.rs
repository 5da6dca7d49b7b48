use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use helios_voice::{
    create_router, AppState, AssistantSession, Attachment, Config, CpalOutput, LogSource,
    NatsTransport, NullOutput, OutputDevice, ReconnectPolicy, UiEvent,
};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "helios", version, about = "Voice and text assistant client")]
struct Cli {
    /// Configuration file, with or without extension
    #[arg(short, long, default_value = "config/helios")]
    config: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Chat from the terminal
    Chat,
    /// Serve the HTTP control API
    Serve,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("helios_voice=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let cfg = Config::load(&cli.config)?;

    info!("Helios Voice v{}", env!("CARGO_PKG_VERSION"));
    info!("Loaded config: {}", cfg.service.name);

    let session = Arc::new(build_session(&cfg).await);
    let policy = cfg.restart_policy();
    let watcher = cfg.reconnect_policy().map(|p| p.spawn(&session));

    let result = match cli.command {
        Command::Chat => run_chat(session.clone(), policy).await,
        Command::Serve => run_server(&cfg, session.clone(), policy).await,
    };

    if let Some(watcher) = watcher {
        watcher.abort();
    }
    session.disconnect().await;

    result
}

async fn build_session(cfg: &Config) -> AssistantSession {
    let transport = Arc::new(NatsTransport::new(cfg.transport_config()));
    let capture = Arc::new(cfg.audio.source());

    let mut speaker_error = None;
    let output: Box<dyn OutputDevice> = if cfg.audio.playback {
        match CpalOutput::open() {
            Ok(output) => Box::new(output),
            Err(e) => {
                warn!("No usable speaker, replies will be silent: {:#}", e);
                speaker_error = Some(e);
                Box::new(NullOutput::new())
            }
        }
    } else {
        Box::new(NullOutput::new())
    };

    let session = AssistantSession::new(cfg.session_config(), transport, capture, output);
    if speaker_error.is_some() {
        session
            .append_log(LogSource::System, "Speaker unavailable; replies will be silent.")
            .await;
    }
    session
}

async fn run_server(
    cfg: &Config,
    session: Arc<AssistantSession>,
    policy: ReconnectPolicy,
) -> Result<()> {
    let addr = cfg.http_addr();
    let app = create_router(AppState::new(session, policy));

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;

    info!("HTTP control API listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutting down");
        })
        .await
        .context("HTTP server failed")
}

async fn run_chat(session: Arc<AssistantSession>, policy: ReconnectPolicy) -> Result<()> {
    let mut events = session.subscribe();
    let printer = tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => print_event(&event),
                Err(RecvError::Lagged(_)) => continue,
                Err(RecvError::Closed) => return,
            }
        }
    });

    println!("Type a message and press enter. Commands: /mute /mic /attach <path> /restart /quit");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut attachment: Option<Attachment> = None;

    while let Some(line) = lines.next_line().await? {
        let line = line.trim();

        match line.split_once(' ').map_or((line, ""), |(cmd, arg)| (cmd, arg.trim())) {
            ("/quit", _) => break,
            ("/mute", _) => {
                let muted = !session.flags().muted();
                session.set_muted(muted).await;
                println!("Speaker {}", if muted { "muted" } else { "on" });
            }
            ("/mic", _) => {
                let enabled = !session.flags().mic_enabled();
                session.set_mic_enabled(enabled).await;
            }
            ("/attach", path) if !path.is_empty() => match Attachment::load(path) {
                Ok(file) => {
                    println!("Attached {} ({})", file.name, file.mime_type);
                    attachment = Some(file);
                }
                Err(e) => {
                    session
                        .append_log(LogSource::Error, format!("{:#}", e))
                        .await;
                }
            },
            ("/restart", _) => policy.restart(&session).await,
            ("", _) if attachment.is_none() => continue,
            _ => {
                // Rejections already land in the transcript
                let _ = session.submit(line, attachment.take()).await;
            }
        }
    }

    printer.abort();
    Ok(())
}

fn print_event(event: &UiEvent) {
    match event {
        UiEvent::Log(entry) => {
            println!(
                "[{}] {}: {}",
                entry.timestamp.format("%H:%M:%S"),
                entry.source,
                entry.text
            );
        }
        UiEvent::ConnectionStateChanged { state, .. } => println!("-- {}", state),
        UiEvent::SpeakingChanged(true) => println!("-- speaking"),
        UiEvent::SpeakingChanged(false) => {}
        UiEvent::MicChanged(on) => println!("-- microphone {}", if *on { "on" } else { "off" }),
    }
}
