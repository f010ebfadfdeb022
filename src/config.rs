use anyhow::{bail, Result};
use serde::Deserialize;
use std::path::PathBuf;

use crate::audio::{CaptureConstraints, CaptureSource};
use crate::realtime::WebSocketConnector;

/// Environment variables override file values, e.g.
/// `VOICE_COACH_REALTIME__URL=wss://...`
const ENV_PREFIX: &str = "VOICE_COACH";

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub service: ServiceConfig,
    pub realtime: RealtimeConfig,
    pub audio: AudioConfig,
    #[serde(default)]
    pub output: OutputConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServiceConfig {
    pub name: String,
    pub http: HttpConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HttpConfig {
    pub bind: String,
    pub port: u16,
    /// How long an ended session stays queryable before it is evicted
    pub session_retention_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RealtimeConfig {
    /// WebSocket URL of the realtime relay
    pub url: String,
    pub auth_token: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AudioConfig {
    /// "microphone", "none", or a path to a WAV file
    pub capture: String,
    pub capture_sample_rate: u32,
    pub playback_sample_rate: u32,
    pub frame_size: usize,
    pub echo_cancellation: bool,
    pub noise_suppression: bool,
    pub auto_gain_control: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct OutputConfig {
    /// Directory for recorded assistant audio; unset disables recording
    pub recordings_path: Option<String>,
}

impl Config {
    /// Load `path` (any format the config crate understands, extension
    /// optional and file optional) layered over defaults, then environment.
    pub fn load(path: &str) -> Result<Self> {
        let settings = config::Config::builder()
            .set_default("service.name", "voice-coach")?
            .set_default("service.http.bind", "127.0.0.1")?
            .set_default("service.http.port", 8787)?
            .set_default("service.http.session_retention_secs", 300)?
            .set_default("realtime.url", "ws://127.0.0.1:8788/realtime")?
            .set_default("audio.capture", "microphone")?
            .set_default("audio.capture_sample_rate", 24000)?
            .set_default("audio.playback_sample_rate", 24000)?
            .set_default("audio.frame_size", 4096)?
            .set_default("audio.echo_cancellation", true)?
            .set_default("audio.noise_suppression", true)?
            .set_default("audio.auto_gain_control", true)?
            .add_source(config::File::with_name(path).required(false))
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let cfg: Self = settings.try_deserialize()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn validate(&self) -> Result<()> {
        if self.audio.frame_size == 0 {
            bail!("audio.frame_size must be greater than zero");
        }
        if self.audio.capture_sample_rate == 0 || self.audio.playback_sample_rate == 0 {
            bail!("audio sample rates must be greater than zero");
        }
        Ok(())
    }

    pub fn constraints(&self) -> CaptureConstraints {
        CaptureConstraints {
            sample_rate: self.audio.capture_sample_rate,
            channel_count: 1,
            echo_cancellation: self.audio.echo_cancellation,
            noise_suppression: self.audio.noise_suppression,
            auto_gain_control: self.audio.auto_gain_control,
            frame_size: self.audio.frame_size,
        }
    }

    pub fn capture_source(&self) -> Option<CaptureSource> {
        match self.audio.capture.trim() {
            "" | "none" => None,
            "microphone" | "mic" => Some(CaptureSource::Microphone),
            path => Some(CaptureSource::File(PathBuf::from(path))),
        }
    }

    pub fn connector(&self) -> WebSocketConnector {
        let connector = WebSocketConnector::new(&self.realtime.url);
        match &self.realtime.auth_token {
            Some(token) if !token.is_empty() => connector.with_auth_token(token),
            _ => connector,
        }
    }

    pub fn recordings_path(&self) -> Option<PathBuf> {
        self.output.recordings_path.as_ref().map(PathBuf::from)
    }
}
