use async_trait::async_trait;
use hound::{SampleFormat, WavReader};
use std::path::{Path, PathBuf};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use super::backend::{CaptureBackend, CaptureConstraints};
use super::convert;
use super::pcm;
use crate::error::{Result, VoiceError};

/// A WAV file decoded to normalized f32 samples
pub struct AudioFile {
    pub path: String,
    pub duration_seconds: f64,
    pub sample_rate: u32,
    pub channels: u16,
    /// Interleaved samples in [-1, 1]
    pub samples: Vec<f32>,
}

impl AudioFile {
    pub fn open(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        info!("Opening audio file: {}", path.display());

        let reader = WavReader::open(path)
            .map_err(|e| anyhow::anyhow!("Failed to open WAV file {}: {}", path.display(), e))?;

        let spec = reader.spec();
        let samples: Vec<f32> = match spec.sample_format {
            SampleFormat::Float => reader
                .into_samples::<f32>()
                .collect::<std::result::Result<Vec<_>, _>>()?,
            SampleFormat::Int if spec.bits_per_sample <= 16 => reader
                .into_samples::<i16>()
                .map(|s| s.map(|s| s as f32 / 32768.0))
                .collect::<std::result::Result<Vec<_>, _>>()?,
            SampleFormat::Int => {
                let scale = (1i64 << (spec.bits_per_sample - 1)) as f32;
                reader
                    .into_samples::<i32>()
                    .map(|s| s.map(|s| s as f32 / scale))
                    .collect::<std::result::Result<Vec<_>, _>>()?
            }
        };

        let duration_seconds =
            samples.len() as f64 / (spec.sample_rate as f64 * spec.channels.max(1) as f64);

        info!(
            "Audio file loaded: {:.1}s, {}Hz, {} channels, {} samples",
            duration_seconds,
            spec.sample_rate,
            spec.channels,
            samples.len()
        );

        Ok(Self {
            path: path.display().to_string(),
            duration_seconds,
            sample_rate: spec.sample_rate,
            channels: spec.channels,
            samples,
        })
    }

    /// Mono samples at `target_rate`
    pub fn to_mono(&self, target_rate: u32) -> Vec<f32> {
        convert::to_mono_at_rate(&self.samples, self.channels, self.sample_rate, target_rate)
    }
}

/// Capture backend that replays a WAV file as microphone input
pub struct FileCapture {
    path: PathBuf,
    paced: bool,
    task: Option<JoinHandle<()>>,
}

impl FileCapture {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            paced: true,
            task: None,
        }
    }

    /// Emit blocks as fast as the consumer reads them
    pub fn unpaced(mut self) -> Self {
        self.paced = false;
        self
    }
}

#[async_trait]
impl CaptureBackend for FileCapture {
    async fn start(&mut self, constraints: &CaptureConstraints) -> Result<mpsc::Receiver<Vec<f32>>> {
        if self.is_capturing() {
            return Err(VoiceError::DeviceUnavailable {
                message: format!("{} is already being captured", self.path.display()),
            });
        }

        if constraints.sample_rate == 0 {
            return Err(VoiceError::DeviceUnavailable {
                message: "capture sample rate must be non-zero".to_string(),
            });
        }

        if !self.path.exists() {
            return Err(VoiceError::DeviceUnavailable {
                message: format!("no such input file: {}", self.path.display()),
            });
        }

        let audio = AudioFile::open(&self.path).map_err(|e| VoiceError::DeviceUnavailable {
            message: e.to_string(),
        })?;
        let samples = audio.to_mono(constraints.sample_rate);
        let block_size = constraints.frame_size.max(1);
        let block_duration = pcm::duration_of(block_size, constraints.sample_rate);
        let paced = self.paced;

        info!(
            "File capture starting: {} ({} samples at {}Hz, paced={})",
            self.path.display(),
            samples.len(),
            constraints.sample_rate,
            paced
        );

        let (tx, rx) = mpsc::channel(32);
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(block_duration);
            for block in samples.chunks(block_size) {
                if paced {
                    ticker.tick().await;
                }
                if tx.send(block.to_vec()).await.is_err() {
                    debug!("File capture receiver dropped");
                    return;
                }
            }
            debug!("File capture reached end of input");
        });

        self.task = Some(task);
        Ok(rx)
    }

    async fn stop(&mut self) -> Result<()> {
        if let Some(task) = self.task.take() {
            task.abort();
            info!("File capture stopped: {}", self.path.display());
        }
        Ok(())
    }

    fn is_capturing(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }

    fn name(&self) -> &str {
        "wav-file"
    }
}
