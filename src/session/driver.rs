//! The per-session event loop.
//!
//! One task owns every handle of a session (channel, microphone, player)
//! and multiplexes caller commands, transport messages, capture frames and
//! playback completions. Handlers run one at a time, so state transitions
//! never interleave.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::config::SessionConfig;
use super::profile::ProfileContext;
use super::stats::{
    SessionEvent, SessionSnapshot, SessionStats, SessionStatus, TranscriptEvent, TranscriptSegment,
};
use crate::audio::{pcm, CaptureBackend, CapturePipeline, FrameOutcome, PlaybackDone, PlaybackPipeline};
use crate::error::{Result, VoiceError};
use crate::realtime::{Channel, ChannelEvent, ClientMessage, Connector, RemoteErrorPayload, ServerMessage};

/// Creates a fresh capture backend each time a session connects
pub type CaptureProvider = Box<dyn Fn() -> Result<Box<dyn CaptureBackend>> + Send + Sync>;

/// Requests from session handles
pub(crate) enum Command {
    Connect {
        profile: ProfileContext,
        reply: oneshot::Sender<Result<()>>,
    },
    Disconnect {
        reply: oneshot::Sender<()>,
    },
    SendText {
        text: String,
        reply: oneshot::Sender<bool>,
    },
    Stats {
        reply: oneshot::Sender<SessionStats>,
    },
    Transcript {
        reply: oneshot::Sender<Vec<TranscriptSegment>>,
    },
}

/// Outcome of a background handshake
struct OpenResult {
    attempt: u64,
    result: anyhow::Result<Channel>,
}

pub(crate) struct SessionDriver {
    config: SessionConfig,
    connector: Arc<dyn Connector>,
    capture_provider: Option<CaptureProvider>,

    status: SessionStatus,
    speaking: bool,
    profile: Option<ProfileContext>,

    channel: Option<Channel>,
    opening: Option<JoinHandle<()>>,
    /// Bumped on every connect/disconnect; older handshakes are discarded
    attempt: u64,
    opened_tx: mpsc::UnboundedSender<OpenResult>,
    opened_rx: mpsc::UnboundedReceiver<OpenResult>,

    capture: Option<CapturePipeline>,
    playback: PlaybackPipeline,
    response_active: bool,

    frames_sent: usize,
    frames_dropped: usize,
    frames_undecodable: usize,
    transcript: Vec<TranscriptSegment>,
    started_at: DateTime<Utc>,

    state_tx: watch::Sender<SessionSnapshot>,
    events: broadcast::Sender<SessionEvent>,
}

impl SessionDriver {
    pub(crate) fn new(
        config: SessionConfig,
        connector: Arc<dyn Connector>,
        capture_provider: Option<CaptureProvider>,
        playback: PlaybackPipeline,
        state_tx: watch::Sender<SessionSnapshot>,
        events: broadcast::Sender<SessionEvent>,
    ) -> Self {
        let (opened_tx, opened_rx) = mpsc::unbounded_channel();
        Self {
            config,
            connector,
            capture_provider,
            status: SessionStatus::Disconnected,
            speaking: false,
            profile: None,
            channel: None,
            opening: None,
            attempt: 0,
            opened_tx,
            opened_rx,
            capture: None,
            playback,
            response_active: false,
            frames_sent: 0,
            frames_dropped: 0,
            frames_undecodable: 0,
            transcript: Vec::new(),
            started_at: Utc::now(),
            state_tx,
            events,
        }
    }

    /// Run until every handle is dropped, then tear down
    pub(crate) async fn run(mut self, mut commands: mpsc::Receiver<Command>) {
        info!("Session {} event loop started", self.config.session_id);

        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(command) => self.handle_command(command).await,
                    None => break,
                },
                Some(opened) = self.opened_rx.recv() => self.on_channel_opened(opened),
                event = next_channel_event(&mut self.channel) => self.on_channel_event(event).await,
                frames = next_capture_frames(&mut self.capture) => self.on_capture_frames(frames).await,
                Some(done) = self.playback.next_completion() => self.on_playback_complete(done),
            }
        }

        self.disconnect().await;
        info!("Session {} event loop stopped", self.config.session_id);
    }

    async fn handle_command(&mut self, command: Command) {
        match command {
            Command::Connect { profile, reply } => {
                let _ = reply.send(self.connect(profile));
            }
            Command::Disconnect { reply } => {
                self.disconnect().await;
                let _ = reply.send(());
            }
            Command::SendText { text, reply } => {
                let _ = reply.send(self.send_text(text));
            }
            Command::Stats { reply } => {
                let _ = reply.send(self.stats());
            }
            Command::Transcript { reply } => {
                let _ = reply.send(self.transcript.clone());
            }
        }
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    fn connect(&mut self, profile: ProfileContext) -> Result<()> {
        let busy = matches!(
            self.status,
            SessionStatus::Connecting | SessionStatus::Connected
        );
        if busy || self.channel.is_some() || self.opening.is_some() {
            warn!(
                "Session {}: connect rejected, channel already exists (status: {})",
                self.config.session_id, self.status
            );
            return Err(VoiceError::SessionActive {
                status: self.status.to_string(),
            });
        }

        info!(
            "Session {}: connecting to {}",
            self.config.session_id,
            self.connector.endpoint()
        );

        self.profile = Some(profile);
        self.attempt += 1;

        let attempt = self.attempt;
        let connector = Arc::clone(&self.connector);
        let opened_tx = self.opened_tx.clone();
        self.opening = Some(tokio::spawn(async move {
            let result = connector.open().await;
            let _ = opened_tx.send(OpenResult { attempt, result });
        }));

        self.set_status(SessionStatus::Connecting);
        Ok(())
    }

    fn on_channel_opened(&mut self, opened: OpenResult) {
        if opened.attempt != self.attempt || self.status != SessionStatus::Connecting {
            if let Ok(channel) = opened.result {
                debug!(
                    "Session {}: discarding channel from abandoned attempt {}",
                    self.config.session_id, opened.attempt
                );
                channel.close();
            }
            return;
        }

        self.opening = None;

        let channel = match opened.result {
            Ok(channel) => channel,
            Err(e) => {
                self.fail(VoiceError::TransportOpenFailure {
                    message: format!("{:#}", e),
                });
                return;
            }
        };

        let profile = self.profile.clone().unwrap_or_default();
        match channel.send(&ClientMessage::session_init(profile)) {
            Ok(true) => {
                info!(
                    "Session {}: channel open, sent session.init, awaiting session.ready",
                    self.config.session_id
                );
                self.channel = Some(channel);
            }
            Ok(false) => {
                channel.close();
                self.fail(VoiceError::TransportOpenFailure {
                    message: "channel closed before session.init could be sent".to_string(),
                });
            }
            Err(e) => {
                channel.close();
                self.fail(e);
            }
        }
    }

    /// Stop everything this session owns. Safe in any state.
    async fn disconnect(&mut self) {
        let previous = self.status;

        self.attempt += 1;
        if let Some(opening) = self.opening.take() {
            opening.abort();
        }
        if let Some(channel) = self.channel.take() {
            channel.close();
        }
        self.stop_capture().await;
        self.playback.reset();
        self.response_active = false;

        self.set_status(SessionStatus::Disconnected);
        self.sync_speaking();

        if previous != SessionStatus::Disconnected {
            info!(
                "Session {} disconnected (was {})",
                self.config.session_id, previous
            );
        }
    }

    async fn on_channel_closed(&mut self, reason: Option<String>) {
        warn!(
            "Session {}: realtime channel closed ({})",
            self.config.session_id,
            reason.as_deref().unwrap_or("no reason given")
        );

        if let Some(channel) = self.channel.take() {
            channel.close();
        }
        self.stop_capture().await;
        self.response_active = false;
        self.set_status(SessionStatus::Disconnected);
    }

    // ========================================================================
    // Inbound messages
    // ========================================================================

    async fn on_channel_event(&mut self, event: ChannelEvent) {
        match event {
            ChannelEvent::Message(text) => match ServerMessage::from_json(&text) {
                Ok(message) => self.dispatch(message).await,
                Err(e) => warn!(
                    "Session {}: ignoring malformed message: {}",
                    self.config.session_id, e
                ),
            },
            ChannelEvent::Closed { reason } => self.on_channel_closed(reason).await,
        }
    }

    async fn dispatch(&mut self, message: ServerMessage) {
        debug!("Session {}: received {}", self.config.session_id, message.kind());

        match message {
            ServerMessage::SessionReady => self.on_session_ready().await,
            ServerMessage::AudioDelta { delta } => self.on_audio_delta(&delta),
            ServerMessage::TranscriptDelta { delta } => self.on_transcript(delta, false),
            ServerMessage::TranscriptDone { transcript } => self.on_transcript(transcript, true),
            ServerMessage::ResponseDone => self.on_response_done(),
            ServerMessage::Error { error } => self.on_remote_error(error),
            ServerMessage::Unknown => {}
        }
    }

    async fn on_session_ready(&mut self) {
        if self.status != SessionStatus::Connecting {
            debug!(
                "Session {}: ignoring session.ready while {}",
                self.config.session_id, self.status
            );
            return;
        }

        self.set_status(SessionStatus::Connected);
        info!("Session {} connected", self.config.session_id);

        if let Err(e) = self.start_capture().await {
            self.fail(e);
        }
    }

    fn on_audio_delta(&mut self, delta: &str) {
        match pcm::decode_audio_delta(delta) {
            Ok(bytes) => {
                self.playback.enqueue(bytes.clone());
                self.sync_speaking();
                self.emit(SessionEvent::Audio(bytes));
            }
            Err(e) => {
                warn!("Session {}: {}", self.config.session_id, e);
                self.frames_undecodable += 1;
            }
        }
    }

    fn on_transcript(&mut self, text: String, is_final: bool) {
        if is_final {
            info!("Session {}: assistant said: {}", self.config.session_id, text);
            self.transcript.push(TranscriptSegment {
                text: text.clone(),
                timestamp: Utc::now(),
            });
        }

        self.emit(SessionEvent::Transcript(TranscriptEvent { text, is_final }));
    }

    fn on_response_done(&mut self) {
        self.response_active = false;
        if self.playback.is_speaking() {
            debug!(
                "Session {}: response complete, {} frames still queued",
                self.config.session_id,
                self.playback.queued()
            );
        }
        self.sync_speaking();
    }

    fn on_remote_error(&mut self, error: Option<RemoteErrorPayload>) {
        let message = error
            .as_ref()
            .map(|e| e.message().to_string())
            .unwrap_or_else(|| "unspecified remote error".to_string());

        self.fail(VoiceError::RemoteError { message });
    }

    // ========================================================================
    // Outbound
    // ========================================================================

    fn send_text(&mut self, text: String) -> bool {
        let channel = match (&self.channel, self.status) {
            (Some(channel), SessionStatus::Connected) => channel,
            _ => {
                debug!(
                    "Session {}: dropping text while {}",
                    self.config.session_id, self.status
                );
                return false;
            }
        };

        let sent = channel
            .send(&ClientMessage::user_text(text))
            .and_then(|sent| Ok(sent && channel.send(&ClientMessage::ResponseCreate)?));

        match sent {
            Ok(true) => {
                self.response_active = true;
                true
            }
            Ok(false) => false,
            Err(e) => {
                error!("Session {}: failed to send text: {}", self.config.session_id, e);
                false
            }
        }
    }

    async fn start_capture(&mut self) -> Result<()> {
        let Some(provider) = &self.capture_provider else {
            return Ok(());
        };

        let backend = provider()?;
        let mut pipeline = CapturePipeline::new(backend, self.config.constraints.clone());
        pipeline.start().await?;
        self.capture = Some(pipeline);
        Ok(())
    }

    async fn stop_capture(&mut self) {
        if let Some(mut capture) = self.capture.take() {
            if capture.stop().await > 0 {
                self.frames_dropped += 1;
            }
        }
    }

    async fn on_capture_frames(&mut self, frames: Option<Vec<Vec<f32>>>) {
        let Some(frames) = frames else {
            info!("Session {}: capture source ended", self.config.session_id);
            self.stop_capture().await;
            return;
        };

        let open = match self.status {
            SessionStatus::Connected => self.channel.as_ref(),
            _ => None,
        };

        for frame in &frames {
            match CapturePipeline::transmit(frame, open) {
                FrameOutcome::Sent => self.frames_sent += 1,
                FrameOutcome::Dropped => self.frames_dropped += 1,
            }
        }
    }

    fn on_playback_complete(&mut self, done: PlaybackDone) {
        self.playback.on_frame_complete(done);
        if self.response_active && !self.playback.is_speaking() {
            debug!(
                "Session {}: playback caught up with a response still streaming",
                self.config.session_id
            );
        }
        self.sync_speaking();
    }

    // ========================================================================
    // State publication
    // ========================================================================

    fn fail(&mut self, error: VoiceError) {
        error!("Session {}: {}", self.config.session_id, error);
        self.set_status(SessionStatus::Error);
        self.emit(SessionEvent::Error(error.to_string()));
    }

    fn set_status(&mut self, status: SessionStatus) {
        if self.status == status {
            return;
        }
        self.status = status;
        self.publish();
        self.emit(SessionEvent::StatusChanged(status));
    }

    fn sync_speaking(&mut self) {
        let speaking = self.playback.is_speaking();
        if self.speaking == speaking {
            return;
        }
        self.speaking = speaking;
        self.publish();
        self.emit(SessionEvent::SpeakingChanged(speaking));
    }

    fn publish(&self) {
        self.state_tx.send_replace(SessionSnapshot {
            status: self.status,
            is_speaking: self.speaking,
        });
    }

    fn emit(&self, event: SessionEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }

    fn stats(&self) -> SessionStats {
        let duration = Utc::now().signed_duration_since(self.started_at);

        SessionStats {
            session_id: self.config.session_id.clone(),
            status: self.status,
            is_speaking: self.speaking,
            started_at: self.started_at,
            duration_secs: duration.num_milliseconds() as f64 / 1000.0,
            frames_sent: self.frames_sent,
            frames_dropped: self.frames_dropped,
            frames_played: self.playback.frames_played(),
            frames_failed: self.playback.frames_failed() + self.frames_undecodable,
            transcript_segments_count: self.transcript.len(),
        }
    }
}

async fn next_channel_event(channel: &mut Option<Channel>) -> ChannelEvent {
    match channel {
        Some(channel) => channel
            .recv()
            .await
            .unwrap_or(ChannelEvent::Closed { reason: None }),
        None => std::future::pending().await,
    }
}

async fn next_capture_frames(capture: &mut Option<CapturePipeline>) -> Option<Vec<Vec<f32>>> {
    match capture {
        Some(capture) => capture.next_frames().await,
        None => std::future::pending().await,
    }
}
