use async_trait::async_trait;
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::mpsc;

use super::pcm;
use crate::error::{Result, VoiceError};

/// Mono PCM16 audio at a fixed sample rate
#[derive(Debug, Clone, PartialEq)]
pub struct AudioFrame {
    /// Raw audio samples (i16 PCM, mono)
    pub samples: Vec<i16>,
    /// Sample rate in Hz
    pub sample_rate: u32,
}

impl AudioFrame {
    pub fn new(samples: Vec<i16>, sample_rate: u32) -> Self {
        Self {
            samples,
            sample_rate,
        }
    }

    /// Parse a little-endian PCM16 payload
    pub fn from_bytes(bytes: &[u8], sample_rate: u32) -> Result<Self> {
        Ok(Self::new(pcm::bytes_to_pcm16(bytes)?, sample_rate))
    }

    /// Playback duration of this frame
    pub fn duration(&self) -> Duration {
        pcm::duration_of(self.samples.len(), self.sample_rate)
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

/// Microphone constraints requested when capture starts
#[derive(Debug, Clone, PartialEq)]
pub struct CaptureConstraints {
    /// Fixed capture sample rate in Hz
    pub sample_rate: u32,
    /// Capture is always mono
    pub channel_count: u16,
    pub echo_cancellation: bool,
    pub noise_suppression: bool,
    pub auto_gain_control: bool,
    /// Samples per emitted frame
    pub frame_size: usize,
}

impl Default for CaptureConstraints {
    fn default() -> Self {
        Self {
            sample_rate: pcm::CAPTURE_SAMPLE_RATE,
            channel_count: 1,
            echo_cancellation: true,
            noise_suppression: true,
            auto_gain_control: true,
            frame_size: pcm::CAPTURE_FRAME_SIZE,
        }
    }
}

/// Audio capture backend trait
///
/// Implementations:
/// - File: replay a WAV file as if it were a microphone
/// - cpal: default system input device (`cpal-audio` feature)
#[async_trait]
pub trait CaptureBackend: Send + Sync {
    /// Start capturing audio
    ///
    /// Returns a channel receiver that yields blocks of mono f32 samples at
    /// `constraints.sample_rate`. Block sizes are arbitrary; framing happens
    /// in the capture pipeline.
    async fn start(&mut self, constraints: &CaptureConstraints) -> Result<mpsc::Receiver<Vec<f32>>>;

    /// Stop capturing audio and release the device
    async fn stop(&mut self) -> Result<()>;

    /// Check if backend is currently capturing
    fn is_capturing(&self) -> bool;

    /// Get backend name for logging
    fn name(&self) -> &str;
}

/// Capture source type
#[derive(Debug, Clone, PartialEq)]
pub enum CaptureSource {
    /// Default microphone (requires the `cpal-audio` feature)
    Microphone,
    /// WAV file replayed in real time
    File(PathBuf),
    /// WAV file replayed as fast as the consumer reads
    FileUnpaced(PathBuf),
}

/// Capture backend factory
pub struct CaptureBackendFactory;

impl CaptureBackendFactory {
    /// Create capture backend based on platform and configuration
    pub fn create(source: &CaptureSource) -> Result<Box<dyn CaptureBackend>> {
        match source {
            CaptureSource::Microphone => {
                #[cfg(feature = "cpal-audio")]
                {
                    Ok(Box::new(super::cpal_io::CpalCapture::new()))
                }

                #[cfg(not(feature = "cpal-audio"))]
                {
                    Err(VoiceError::DeviceUnavailable {
                        message: "microphone capture requires the cpal-audio feature".to_string(),
                    })
                }
            }

            CaptureSource::File(path) => Ok(Box::new(super::file::FileCapture::new(path.clone()))),

            CaptureSource::FileUnpaced(path) => Ok(Box::new(
                super::file::FileCapture::new(path.clone()).unpaced(),
            )),
        }
    }
}
