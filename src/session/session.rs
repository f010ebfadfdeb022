use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tracing::info;

use super::config::SessionConfig;
use super::driver::{CaptureProvider, Command, SessionDriver};
use super::profile::ProfileContext;
use super::stats::{SessionEvent, SessionSnapshot, SessionStats, SessionStatus, TranscriptSegment};
use crate::audio::{AudioPlayer, CaptureBackend, CaptureBackendFactory, ClockPlayer, PlaybackPipeline};
use crate::error::{Result, VoiceError};
use crate::realtime::Connector;

/// Pending commands per session
const COMMAND_CAPACITY: usize = 32;

/// Handle to one voice-coaching session
///
/// The session itself runs on its own task; handles are cheap to clone.
/// When the last handle is dropped the session disconnects and stops.
#[derive(Clone)]
pub struct VoiceSession {
    session_id: String,
    commands: mpsc::Sender<Command>,
    state: watch::Receiver<SessionSnapshot>,
    events: broadcast::Sender<SessionEvent>,
}

impl VoiceSession {
    pub fn builder(config: SessionConfig, connector: Arc<dyn Connector>) -> VoiceSessionBuilder {
        VoiceSessionBuilder {
            config,
            connector,
            player: None,
            capture: None,
        }
    }

    /// Start a session with the default player and configured capture source
    pub fn spawn(config: SessionConfig, connector: Arc<dyn Connector>) -> Self {
        Self::builder(config, connector).spawn()
    }

    pub fn id(&self) -> &str {
        &self.session_id
    }

    /// Open the realtime channel and introduce the user.
    ///
    /// Returns once the attempt has started; watch `status()` or subscribe
    /// for the transition to `connected`. Rejected with `SessionActive` while
    /// a channel exists.
    pub async fn connect(&self, profile: ProfileContext) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.request(Command::Connect { profile, reply }, rx).await?
    }

    /// Close the channel, stop the microphone, silence playback.
    ///
    /// Always safe, including on a session that never connected.
    pub async fn disconnect(&self) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        match self.request(Command::Disconnect { reply }, rx).await {
            Err(VoiceError::SessionClosed) => Ok(()),
            other => other,
        }
    }

    /// Send a user text turn and request a response.
    ///
    /// Returns `false` without sending anything unless connected.
    pub async fn send_text(&self, text: impl Into<String>) -> Result<bool> {
        let (reply, rx) = oneshot::channel();
        let text = text.into();
        self.request(Command::SendText { text, reply }, rx).await
    }

    pub async fn stats(&self) -> Result<SessionStats> {
        let (reply, rx) = oneshot::channel();
        self.request(Command::Stats { reply }, rx).await
    }

    /// Final assistant utterances received so far
    pub async fn transcript(&self) -> Result<Vec<TranscriptSegment>> {
        let (reply, rx) = oneshot::channel();
        self.request(Command::Transcript { reply }, rx).await
    }

    /// Whether both handles drive the same session task
    pub fn same_session(&self, other: &VoiceSession) -> bool {
        self.commands.same_channel(&other.commands)
    }

    pub fn status(&self) -> SessionStatus {
        self.state.borrow().status
    }

    pub fn is_connected(&self) -> bool {
        self.state.borrow().is_connected()
    }

    pub fn is_speaking(&self) -> bool {
        self.state.borrow().is_speaking
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        *self.state.borrow()
    }

    /// Observe status and speaking changes
    pub fn watch(&self) -> watch::Receiver<SessionSnapshot> {
        self.state.clone()
    }

    /// Receive transcript, audio, status and error events from now on
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    /// Wait until the session reaches `status`
    pub async fn wait_for_status(&self, status: SessionStatus) -> Result<()> {
        let mut state = self.state.clone();
        state
            .wait_for(|snapshot| snapshot.status == status)
            .await
            .map(|_| ())
            .map_err(|_| VoiceError::SessionClosed)
    }

    async fn request<T>(&self, command: Command, rx: oneshot::Receiver<T>) -> Result<T> {
        self.commands
            .send(command)
            .await
            .map_err(|_| VoiceError::SessionClosed)?;
        rx.await.map_err(|_| VoiceError::SessionClosed)
    }
}

/// Assembles a session from its collaborators
pub struct VoiceSessionBuilder {
    config: SessionConfig,
    connector: Arc<dyn Connector>,
    player: Option<Box<dyn AudioPlayer>>,
    capture: Option<CaptureProvider>,
}

impl VoiceSessionBuilder {
    /// Output device for assistant audio (default: [`ClockPlayer`])
    pub fn player(mut self, player: Box<dyn AudioPlayer>) -> Self {
        self.player = Some(player);
        self
    }

    /// Override how capture backends are created
    pub fn capture_backend<F>(mut self, provider: F) -> Self
    where
        F: Fn() -> Result<Box<dyn CaptureBackend>> + Send + Sync + 'static,
    {
        self.capture = Some(Box::new(provider));
        self
    }

    /// Spawn the session task. Must be called within a tokio runtime.
    pub fn spawn(self) -> VoiceSession {
        let VoiceSessionBuilder {
            config,
            connector,
            player,
            capture,
        } = self;

        let capture = capture.or_else(|| {
            config.capture.clone().map(|source| {
                Box::new(move || CaptureBackendFactory::create(&source)) as CaptureProvider
            })
        });
        let player = player.unwrap_or_else(|| Box::new(ClockPlayer::new()));

        info!(
            "Creating voice session {} (player: {}, capture: {})",
            config.session_id,
            player.name(),
            if capture.is_some() { "enabled" } else { "disabled" }
        );

        let playback = PlaybackPipeline::new(player, config.playback_sample_rate);
        let (commands_tx, commands_rx) = mpsc::channel(COMMAND_CAPACITY);
        let (state_tx, state_rx) = watch::channel(SessionSnapshot::default());
        let (events_tx, _) = broadcast::channel(config.event_capacity.max(1));
        let session_id = config.session_id.clone();

        let driver = SessionDriver::new(
            config,
            connector,
            capture,
            playback,
            state_tx,
            events_tx.clone(),
        );
        tokio::spawn(driver.run(commands_rx));

        VoiceSession {
            session_id,
            commands: commands_tx,
            state: state_rx,
            events: events_tx,
        }
    }
}
