//! Voice session management
//!
//! This module provides the `VoiceSession` abstraction that manages:
//! - Connection lifecycle to the realtime endpoint (connect/disconnect)
//! - Microphone capture while connected
//! - Sequential playback of assistant audio
//! - Transcript collection and session statistics

mod config;
mod driver;
mod profile;
mod session;
mod stats;

pub use config::SessionConfig;
pub use driver::CaptureProvider;
pub use profile::{Measurement, ProfileContext, Quantity, TargetMacros};
pub use session::{VoiceSession, VoiceSessionBuilder};
pub use stats::{
    SessionEvent, SessionSnapshot, SessionStats, SessionStatus, TranscriptEvent, TranscriptSegment,
};
