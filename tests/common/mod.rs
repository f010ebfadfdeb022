// Shared fixtures for integration tests

#![allow(dead_code)]

use base64::Engine;
use std::collections::VecDeque;
use std::future::Future;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use voice_coach::audio::{AudioPlayer, PlaybackBuffer, PlaybackCompletion};

/// Player that holds every completion until the test releases it
#[derive(Clone, Default)]
pub struct ManualPlayer {
    inner: Arc<Mutex<ManualState>>,
}

#[derive(Default)]
struct ManualState {
    pending: VecDeque<PlaybackCompletion>,
    played: Vec<PlaybackBuffer>,
    stops: usize,
    fail_next: usize,
}

impl ManualPlayer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn boxed(&self) -> Box<dyn AudioPlayer> {
        Box::new(self.clone())
    }

    /// Buffers handed to the player so far
    pub fn played(&self) -> Vec<PlaybackBuffer> {
        self.inner.lock().unwrap().played.clone()
    }

    pub fn played_count(&self) -> usize {
        self.inner.lock().unwrap().played.len()
    }

    pub fn stops(&self) -> usize {
        self.inner.lock().unwrap().stops
    }

    /// Reject the next `n` buffers from `play`
    pub fn fail_next(&self, n: usize) {
        self.inner.lock().unwrap().fail_next = n;
    }

    /// Report the oldest outstanding buffer as played
    pub fn finish_one(&self) -> bool {
        let completion = self.inner.lock().unwrap().pending.pop_front();
        match completion {
            Some(completion) => {
                completion.finished();
                true
            }
            None => false,
        }
    }

    /// Report the oldest outstanding buffer as failed
    pub fn fail_one(&self, message: &str) -> bool {
        let completion = self.inner.lock().unwrap().pending.pop_front();
        match completion {
            Some(completion) => {
                completion.failed(message);
                true
            }
            None => false,
        }
    }
}

impl AudioPlayer for ManualPlayer {
    fn play(
        &mut self,
        buffer: PlaybackBuffer,
        completion: PlaybackCompletion,
    ) -> voice_coach::Result<()> {
        let mut state = self.inner.lock().unwrap();
        if state.fail_next > 0 {
            state.fail_next -= 1;
            return Err(voice_coach::VoiceError::Playback {
                message: "device busy".to_string(),
            });
        }
        state.played.push(buffer);
        state.pending.push_back(completion);
        Ok(())
    }

    fn stop(&mut self) {
        self.inner.lock().unwrap().stops += 1;
    }

    fn name(&self) -> &str {
        "manual"
    }
}

/// Base64 PCM16 payload of `samples` copies of `value`
pub fn audio_delta(value: i16, samples: usize) -> String {
    let bytes: Vec<u8> = std::iter::repeat(value)
        .take(samples)
        .flat_map(|s| s.to_le_bytes())
        .collect();
    base64::engine::general_purpose::STANDARD.encode(bytes)
}

/// Poll `condition` until it holds, failing the test after a few seconds
pub async fn eventually<F>(what: &str, mut condition: F)
where
    F: FnMut() -> bool,
{
    for _ in 0..500 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("timed out waiting for {}", what);
}

/// Await `future`, failing the test after a few seconds
pub async fn within<T>(what: &str, future: impl Future<Output = T>) -> T {
    match tokio::time::timeout(Duration::from_secs(5), future).await {
        Ok(value) => value,
        Err(_) => panic!("timed out waiting for {}", what),
    }
}

/// Write a mono 16-bit WAV file
pub fn write_wav(path: &Path, sample_rate: u32, samples: &[i16]) {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::create(path, spec).unwrap();
    for &sample in samples {
        writer.write_sample(sample).unwrap();
    }
    writer.finalize().unwrap();
}
