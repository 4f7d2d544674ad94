use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::net::SocketAddr;
use std::path::PathBuf;
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use voice_chat::{
    create_router, AppState, AudioSource, Config, ConnectionState, Notification, VoiceSession,
};

/// Voice chat client for a hosted agent
#[derive(Parser)]
#[command(name = "voice-chat", version, about)]
struct Cli {
    /// Configuration file (extension optional)
    #[arg(short, long, default_value = "config/voice-chat")]
    config: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the HTTP control API
    Serve,
    /// Talk to the agent once, using an audio file as the microphone
    Talk {
        /// Audio file played as captured input
        #[arg(short, long)]
        input: PathBuf,

        /// Session id (generated when omitted)
        #[arg(long)]
        session_id: Option<String>,

        /// Feed the file as fast as possible; the session ends with the file
        #[arg(long)]
        fast: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let cfg = Config::load(&cli.config)?;
    info!("Loaded config: {}", cfg.service.name);

    match cli.command {
        Command::Serve => serve(cfg).await,
        Command::Talk {
            input,
            session_id,
            fast,
        } => talk(cfg, input, session_id, !fast).await,
    }
}

async fn serve(cfg: Config) -> Result<()> {
    let addr: SocketAddr = format!("{}:{}", cfg.service.http.bind, cfg.service.http.port)
        .parse()
        .context("Invalid HTTP bind address")?;

    let app = create_router(AppState::new(cfg));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;

    info!("HTTP control API listening on {}", addr);
    axum::serve(listener, app).await.context("HTTP server failed")?;
    Ok(())
}

async fn talk(
    cfg: Config,
    input: PathBuf,
    session_id: Option<String>,
    realtime: bool,
) -> Result<()> {
    let session_config = cfg.session_config(session_id);
    if session_config.api_key.is_none() {
        anyhow::bail!("session.api_key (or VOICE_CHAT__SESSION__API_KEY) must be set");
    }

    let source = AudioSource::File {
        path: input,
        realtime,
    };
    let handle = VoiceSession::spawn(session_config, cfg.runtime_options(source))?;
    let mut notifications = handle.subscribe();
    handle.connect(None)?;

    let mut voice_started = false;
    let mut failure = None;
    loop {
        let notification = tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted");
                break;
            }
            received = notifications.recv() => match received {
                Ok(notification) => notification,
                Err(RecvError::Lagged(skipped)) => {
                    warn!("Missed {} notifications", skipped);
                    continue;
                }
                Err(RecvError::Closed) => break,
            },
        };

        match notification {
            Notification::Transcript(message) => println!("you:   {}", message.content),
            Notification::ResponseText(message) => println!("agent: {}", message.content),
            Notification::Warning(message) => warn!("Agent reported: {}", message),
            Notification::Error(message) => {
                failure = Some(message);
                break;
            }
            Notification::VoiceMode(true) => voice_started = true,
            Notification::VoiceMode(false) if voice_started => {
                info!("Voice mode ended");
                break;
            }
            Notification::Connection(ConnectionState::Disconnected) => {
                info!("Connection closed");
                break;
            }
            other => tracing::debug!("{:?}", other),
        }
    }

    let snapshot = handle.snapshot().await?;
    handle.shutdown().await?;

    if let Some(message) = failure {
        anyhow::bail!("voice session failed: {}", message);
    }
    info!(
        "Sent {} utterance(s), saved {} response(s) under {}",
        snapshot.stats.utterances_sent,
        snapshot.stats.responses_played,
        cfg.playback.output_dir.display()
    );
    Ok(())
}
