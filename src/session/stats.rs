use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Connection status of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Disconnected,
    Connecting,
    Connected,
    Error,
}

impl SessionStatus {
    /// No channel work remains: the session closed or failed
    pub fn is_ended(&self) -> bool {
        matches!(self, SessionStatus::Disconnected | SessionStatus::Error)
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SessionStatus::Disconnected => "disconnected",
            SessionStatus::Connecting => "connecting",
            SessionStatus::Connected => "connected",
            SessionStatus::Error => "error",
        };
        f.write_str(s)
    }
}

/// Observable state, published on every change
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub status: SessionStatus,
    pub is_speaking: bool,
}

impl SessionSnapshot {
    pub fn is_connected(&self) -> bool {
        self.status == SessionStatus::Connected
    }
}

impl Default for SessionSnapshot {
    fn default() -> Self {
        Self {
            status: SessionStatus::Disconnected,
            is_speaking: false,
        }
    }
}

/// Partial or final text of the assistant's current utterance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptEvent {
    pub text: String,
    #[serde(rename = "final")]
    pub is_final: bool,
}

/// Notifications delivered to subscribers, in the order they happened
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    StatusChanged(SessionStatus),
    SpeakingChanged(bool),
    Transcript(TranscriptEvent),
    /// Raw PCM16 bytes of one inbound audio delta
    Audio(Vec<u8>),
    /// Hardware, transport, or remote failure
    Error(String),
}

/// Statistics about a voice session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionStats {
    pub session_id: String,

    pub status: SessionStatus,

    pub is_speaking: bool,

    /// When the session was created
    pub started_at: DateTime<Utc>,

    /// Total duration in seconds
    pub duration_secs: f64,

    /// Capture frames handed to the transport
    pub frames_sent: usize,

    /// Capture frames discarded because the transport was not open
    pub frames_dropped: usize,

    /// Assistant frames played to completion
    pub frames_played: usize,

    /// Assistant frames skipped after a decode or playback failure
    pub frames_failed: usize,

    /// Number of final transcript segments received
    pub transcript_segments_count: usize,
}

/// A final assistant utterance
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptSegment {
    /// Transcribed text
    pub text: String,

    /// When this segment was received
    pub timestamp: DateTime<Utc>,
}
