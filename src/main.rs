use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};
use voice_coach::audio::{AudioPlayer, ClockPlayer, WavPlayer};
use voice_coach::http::{create_router, AppState, SessionFactory};
use voice_coach::session::SessionSnapshot;
use voice_coach::{CaptureSource, Config, ProfileContext, SessionConfig, SessionEvent, SessionStatus, VoiceSession};

#[derive(Parser)]
#[command(name = "voice-coach", version, about = "Realtime voice coaching client")]
struct Cli {
    /// Config file, without extension
    #[arg(long, default_value = "config/voice-coach")]
    config: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the HTTP control API
    Serve,

    /// Hold one conversation from the terminal
    Talk {
        /// User profile as inline JSON or a path to a JSON file
        #[arg(long, default_value = "{}")]
        profile: String,

        /// Stream a WAV file instead of the microphone
        #[arg(long, conflicts_with = "mic")]
        input: Option<PathBuf>,

        /// Capture from the default microphone
        #[arg(long)]
        mic: bool,

        /// Write assistant audio to a WAV file
        #[arg(long)]
        record: Option<PathBuf>,

        /// Send a text turn once connected
        #[arg(long)]
        text: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();
    let cfg = Config::load(&cli.config)?;

    info!("Voice Coach v{}", env!("CARGO_PKG_VERSION"));
    info!("Loaded config: {}", cfg.service.name);
    info!("Realtime endpoint: {}", cfg.realtime.url);

    match cli.command {
        Command::Serve => serve(cfg).await,
        Command::Talk {
            profile,
            input,
            mic,
            record,
            text,
        } => {
            let capture = match (input, mic) {
                (Some(path), _) => Some(CaptureSource::File(path)),
                (None, true) => Some(CaptureSource::Microphone),
                (None, false) => None,
            };
            talk(cfg, parse_profile(&profile)?, capture, record, text).await
        }
    }
}

async fn serve(cfg: Config) -> Result<()> {
    let factory = SessionFactory {
        capture: cfg.capture_source(),
        constraints: cfg.constraints(),
        playback_sample_rate: cfg.audio.playback_sample_rate,
        recordings_path: cfg.recordings_path(),
        ..SessionFactory::new(Arc::new(cfg.connector()))
    };
    let retention = Duration::from_secs(cfg.service.http.session_retention_secs);
    let app = create_router(AppState::new(factory).with_retention(retention));

    let addr = format!("{}:{}", cfg.service.http.bind, cfg.service.http.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;

    info!("HTTP server listening on {}", addr);
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutting down");
        })
        .await?;

    Ok(())
}

async fn talk(
    cfg: Config,
    profile: ProfileContext,
    capture: Option<CaptureSource>,
    record: Option<PathBuf>,
    text: Option<String>,
) -> Result<()> {
    let config = SessionConfig {
        capture: capture.clone(),
        constraints: cfg.constraints(),
        playback_sample_rate: cfg.audio.playback_sample_rate,
        ..SessionConfig::default()
    };

    let player = open_player(record.as_ref(), config.playback_sample_rate)?;
    let session = VoiceSession::builder(config, Arc::new(cfg.connector()))
        .player(player)
        .spawn();
    let mut events = session.subscribe();

    session.connect(profile).await?;
    let mut text = text;
    let text_only = capture.is_none();
    let mut answered = false;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted");
                break;
            }
            event = events.recv() => match event {
                Ok(SessionEvent::StatusChanged(SessionStatus::Connected)) => {
                    println!("[connected]");
                    if let Some(text) = text.take() {
                        println!("you: {}", text);
                        session.send_text(text).await?;
                    }
                }
                Ok(SessionEvent::StatusChanged(status @ (SessionStatus::Disconnected | SessionStatus::Error))) => {
                    println!("[{}]", status);
                    break;
                }
                Ok(SessionEvent::Transcript(t)) if t.is_final => {
                    println!("coach: {}", t.text);
                    answered = true;
                }
                Ok(SessionEvent::SpeakingChanged(false)) if text_only && answered => break,
                Ok(SessionEvent::Error(message)) => eprintln!("error: {}", message),
                Ok(_) => {}
                Err(RecvError::Lagged(n)) => warn!("Missed {} session events", n),
                Err(RecvError::Closed) => break,
            }
        }
    }

    // Let the last reply finish playing
    if session.is_speaking() && session.status() != SessionStatus::Error {
        let mut state = session.watch();
        let drained = state.wait_for(|s: &SessionSnapshot| !s.is_speaking);
        tokio::select! {
            _ = drained => {}
            _ = tokio::signal::ctrl_c() => {}
        }
    }

    session.disconnect().await?;
    let stats = session.stats().await?;
    println!("{}", serde_json::to_string_pretty(&stats)?);

    Ok(())
}

fn parse_profile(arg: &str) -> Result<ProfileContext> {
    let json = if arg.trim_start().starts_with('{') {
        arg.to_string()
    } else {
        std::fs::read_to_string(arg).with_context(|| format!("Failed to read profile {}", arg))?
    };
    serde_json::from_str(&json).context("Invalid profile JSON")
}

fn open_player(record: Option<&PathBuf>, sample_rate: u32) -> Result<Box<dyn AudioPlayer>> {
    if let Some(path) = record {
        return Ok(Box::new(WavPlayer::create(path, sample_rate)?.paced()));
    }

    #[cfg(feature = "cpal-audio")]
    {
        match voice_coach::audio::CpalPlayer::open() {
            Ok(player) => return Ok(Box::new(player)),
            Err(e) => warn!("No speaker available, replies will be silent: {}", e),
        }
    }

    Ok(Box::new(ClockPlayer::new()))
}
