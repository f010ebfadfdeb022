use crate::audio::{AudioPlayer, CaptureConstraints, CaptureSource, WavPlayer};
use crate::audio::pcm::PLAYBACK_SAMPLE_RATE;
use crate::error::Result;
use crate::realtime::Connector;
use crate::session::{SessionConfig, VoiceSession};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::info;

/// Default time an ended session stays queryable
pub const DEFAULT_SESSION_RETENTION: Duration = Duration::from_secs(300);

/// Shared application state for HTTP handlers
#[derive(Clone)]
pub struct AppState {
    /// Active voice sessions (session_id → session)
    pub sessions: Arc<RwLock<HashMap<String, VoiceSession>>>,

    /// Builds sessions for incoming connect requests
    pub factory: Arc<SessionFactory>,

    /// Ended sessions are evicted after this long
    pub retention: Duration,
}

impl AppState {
    pub fn new(factory: SessionFactory) -> Self {
        Self {
            sessions: Arc::new(RwLock::new(HashMap::new())),
            factory: Arc::new(factory),
            retention: DEFAULT_SESSION_RETENTION,
        }
    }

    pub fn with_retention(mut self, retention: Duration) -> Self {
        self.retention = retention;
        self
    }

    /// Evict `session` from the map once it has stayed ended for the
    /// retention period. A session replaced under the same id is left alone.
    pub fn track(&self, session: VoiceSession) {
        let sessions = Arc::clone(&self.sessions);
        let retention = self.retention;

        tokio::spawn(async move {
            let mut state = session.watch();
            loop {
                let ended = state.wait_for(|s| s.status.is_ended()).await.map(|_| ());
                if ended.is_err() {
                    break;
                }
                tokio::time::sleep(retention).await;
                if state.borrow().status.is_ended() {
                    break;
                }
            }

            let mut sessions = sessions.write().await;
            let current = sessions
                .get(session.id())
                .is_some_and(|s| s.same_session(&session));
            if current {
                sessions.remove(session.id());
                info!("Evicted ended session {}", session.id());
            }
        });
    }
}

/// Everything needed to start a session on behalf of an HTTP client
pub struct SessionFactory {
    pub connector: Arc<dyn Connector>,

    /// Capture source for new sessions; `None` for text-only
    pub capture: Option<CaptureSource>,

    pub constraints: CaptureConstraints,

    pub playback_sample_rate: u32,

    /// When set, assistant audio of each session is written to
    /// `<recordings_path>/<session_id>.wav`
    pub recordings_path: Option<PathBuf>,
}

impl SessionFactory {
    pub fn new(connector: Arc<dyn Connector>) -> Self {
        Self {
            connector,
            capture: None,
            constraints: CaptureConstraints::default(),
            playback_sample_rate: PLAYBACK_SAMPLE_RATE,
            recordings_path: None,
        }
    }

    /// Spawn a session; the caller connects it
    pub fn create(&self, session_id: String) -> Result<VoiceSession> {
        let config = SessionConfig {
            session_id,
            capture: self.capture.clone(),
            constraints: self.constraints.clone(),
            playback_sample_rate: self.playback_sample_rate,
            ..SessionConfig::default()
        };

        let mut builder = VoiceSession::builder(config.clone(), Arc::clone(&self.connector));
        if let Some(dir) = &self.recordings_path {
            let path = dir.join(format!("{}.wav", config.session_id));
            let player = WavPlayer::create(path, config.playback_sample_rate)?.paced();
            builder = builder.player(Box::new(player) as Box<dyn AudioPlayer>);
        }

        Ok(builder.spawn())
    }
}
