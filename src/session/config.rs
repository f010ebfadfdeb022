use crate::audio::pcm::PLAYBACK_SAMPLE_RATE;
use crate::audio::{CaptureConstraints, CaptureSource};

/// Configuration for a voice session
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Unique session identifier (e.g., "voice-6f1c...")
    pub session_id: String,

    /// Where microphone audio comes from; `None` for text-only sessions
    pub capture: Option<CaptureSource>,

    /// Constraints requested when capture starts
    pub constraints: CaptureConstraints,

    /// Sample rate of assistant audio (the endpoint sends 24kHz PCM16)
    pub playback_sample_rate: u32,

    /// Capacity of the event broadcast; slow subscribers lose the oldest events
    pub event_capacity: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            session_id: format!("voice-{}", uuid::Uuid::new_v4()),
            capture: Some(CaptureSource::Microphone),
            constraints: CaptureConstraints::default(),
            playback_sample_rate: PLAYBACK_SAMPLE_RATE,
            event_capacity: 1024,
        }
    }
}

impl SessionConfig {
    /// A session that never opens the microphone
    pub fn text_only() -> Self {
        Self {
            capture: None,
            ..Self::default()
        }
    }
}
