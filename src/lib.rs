pub mod audio;
pub mod config;
pub mod error;
pub mod http;
pub mod realtime;
pub mod session;

pub use audio::{
    AudioFile, AudioFrame, AudioPlayer, CaptureBackend, CaptureBackendFactory, CaptureConstraints,
    CaptureSource, ClockPlayer, PlaybackPipeline, PlaybackQueue, WavPlayer,
};
pub use config::Config;
pub use error::{Result, VoiceError};
pub use http::{create_router, AppState, SessionFactory};
pub use realtime::{ClientMessage, Connector, MemoryConnector, ServerMessage, WebSocketConnector};
pub use session::{
    ProfileContext, SessionConfig, SessionEvent, SessionStats, SessionStatus, TranscriptEvent,
    TranscriptSegment, VoiceSession,
};
