pub mod backend;
pub mod capture;
pub mod convert;
pub mod file;
pub mod pcm;
pub mod playback;
pub mod player;

#[cfg(feature = "cpal-audio")]
pub mod cpal_io;

pub use backend::{AudioFrame, CaptureBackend, CaptureBackendFactory, CaptureConstraints, CaptureSource};
pub use capture::{CapturePipeline, FrameAssembler, FrameOutcome};
pub use file::{AudioFile, FileCapture};
pub use playback::{PlaybackPipeline, PlaybackQueue, Started, Transition};
pub use player::{AudioPlayer, ClockPlayer, PlaybackBuffer, PlaybackCompletion, PlaybackDone, WavPlayer};

#[cfg(feature = "cpal-audio")]
pub use cpal_io::{CpalCapture, CpalPlayer};
