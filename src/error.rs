//! Error types for voice sessions.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum VoiceError {
    // Capture errors
    #[error("Microphone permission denied: {message}")]
    PermissionDenied { message: String },

    #[error("Audio input device unavailable: {message}")]
    DeviceUnavailable { message: String },

    // Transport errors
    #[error("Failed to open realtime channel: {message}")]
    TransportOpenFailure { message: String },

    #[error("Remote endpoint error: {message}")]
    RemoteError { message: String },

    #[error("Realtime protocol error: {0}")]
    Protocol(#[from] serde_json::Error),

    // Per-frame errors (recovered locally, never escalated)
    #[error("Failed to decode audio frame: {message}")]
    FrameDecodeFailure { message: String },

    #[error("Audio playback failed: {message}")]
    Playback { message: String },

    // Lifecycle errors
    #[error("Session already has an active channel (status: {status})")]
    SessionActive { status: String },

    #[error("Session task is no longer running")]
    SessionClosed,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl VoiceError {
    /// Whether this error only affects a single audio frame.
    pub fn is_frame_local(&self) -> bool {
        matches!(
            self,
            VoiceError::FrameDecodeFailure { .. } | VoiceError::Playback { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, VoiceError>;
