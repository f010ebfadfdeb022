use hound::{SampleFormat, WavSpec, WavWriter};
use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use super::pcm;
use crate::error::{Result, VoiceError};

/// A decoded mono buffer ready for output
#[derive(Debug, Clone, PartialEq)]
pub struct PlaybackBuffer {
    /// Normalized samples in [-1, 1]
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

impl PlaybackBuffer {
    pub fn duration(&self) -> Duration {
        pcm::duration_of(self.samples.len(), self.sample_rate)
    }
}

/// Completion report for one played buffer
#[derive(Debug, Clone, PartialEq)]
pub struct PlaybackDone {
    pub ticket: u64,
    pub result: std::result::Result<(), String>,
}

/// Handed to a player with each buffer; consumed when playback ends
#[derive(Debug)]
pub struct PlaybackCompletion {
    ticket: u64,
    tx: mpsc::UnboundedSender<PlaybackDone>,
}

impl PlaybackCompletion {
    pub fn new(ticket: u64, tx: mpsc::UnboundedSender<PlaybackDone>) -> Self {
        Self { ticket, tx }
    }

    pub fn ticket(&self) -> u64 {
        self.ticket
    }

    /// The buffer played to the end
    pub fn finished(self) {
        let _ = self.tx.send(PlaybackDone {
            ticket: self.ticket,
            result: Ok(()),
        });
    }

    /// The buffer could not be played
    pub fn failed(self, message: impl Into<String>) {
        let _ = self.tx.send(PlaybackDone {
            ticket: self.ticket,
            result: Err(message.into()),
        });
    }
}

/// Audio output device
///
/// `play` returns immediately; the player reports the end of playback
/// through the completion. At most one buffer is handed over at a time.
pub trait AudioPlayer: Send {
    fn play(&mut self, buffer: PlaybackBuffer, completion: PlaybackCompletion) -> Result<()>;

    /// Silence output now; pending completions may be dropped
    fn stop(&mut self);

    fn name(&self) -> &str;
}

/// Headless player that completes after the buffer's real duration
#[derive(Default)]
pub struct ClockPlayer {
    current: Option<JoinHandle<()>>,
}

impl ClockPlayer {
    pub fn new() -> Self {
        Self::default()
    }
}

impl AudioPlayer for ClockPlayer {
    fn play(&mut self, buffer: PlaybackBuffer, completion: PlaybackCompletion) -> Result<()> {
        let duration = buffer.duration();
        self.current = Some(tokio::spawn(async move {
            tokio::time::sleep(duration).await;
            completion.finished();
        }));
        Ok(())
    }

    fn stop(&mut self) {
        if let Some(task) = self.current.take() {
            task.abort();
        }
    }

    fn name(&self) -> &str {
        "clock"
    }
}

/// Records everything the assistant says into a WAV file
pub struct WavPlayer {
    path: PathBuf,
    writer: Option<WavWriter<BufWriter<File>>>,
    clock: Option<ClockPlayer>,
    samples_written: usize,
}

impl WavPlayer {
    pub fn create(path: impl AsRef<Path>, sample_rate: u32) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let spec = WavSpec {
            channels: 1,
            sample_rate,
            bits_per_sample: 16,
            sample_format: SampleFormat::Int,
        };

        let writer = WavWriter::create(&path, spec).map_err(|e| VoiceError::Playback {
            message: format!("Failed to create WAV file {:?}: {}", path, e),
        })?;

        info!("Recording assistant audio to {}", path.display());

        Ok(Self {
            path,
            writer: Some(writer),
            clock: None,
            samples_written: 0,
        })
    }

    /// Complete buffers after their real duration instead of immediately
    pub fn paced(mut self) -> Self {
        self.clock = Some(ClockPlayer::new());
        self
    }

    pub fn samples_written(&self) -> usize {
        self.samples_written
    }

    /// Flush the WAV header and close the file
    pub fn finish(&mut self) -> Result<()> {
        if let Some(writer) = self.writer.take() {
            writer.finalize().map_err(|e| VoiceError::Playback {
                message: format!("Failed to finalize {:?}: {}", self.path, e),
            })?;
            info!(
                "Finished assistant recording {} ({} samples)",
                self.path.display(),
                self.samples_written
            );
        }
        Ok(())
    }
}

impl AudioPlayer for WavPlayer {
    fn play(&mut self, buffer: PlaybackBuffer, completion: PlaybackCompletion) -> Result<()> {
        let Some(writer) = self.writer.as_mut() else {
            return Err(VoiceError::Playback {
                message: format!("{:?} is already finalized", self.path),
            });
        };

        for &sample in &buffer.samples {
            writer
                .write_sample(pcm::encode_sample(sample))
                .map_err(|e| VoiceError::Playback {
                    message: format!("Failed to write sample: {}", e),
                })?;
        }
        self.samples_written += buffer.samples.len();

        match self.clock.as_mut() {
            Some(clock) => clock.play(buffer, completion),
            None => {
                completion.finished();
                Ok(())
            }
        }
    }

    fn stop(&mut self) {
        if let Some(clock) = self.clock.as_mut() {
            clock.stop();
        }
    }

    fn name(&self) -> &str {
        "wav"
    }
}

impl Drop for WavPlayer {
    fn drop(&mut self) {
        if let Err(e) = self.finish() {
            warn!("Failed to finalize WAV recording on drop: {}", e);
        }
    }
}
