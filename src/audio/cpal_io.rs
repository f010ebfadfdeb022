//! Microphone capture and speaker output through cpal.
//!
//! cpal streams are not `Send`, so each stream lives on its own thread and
//! is dropped there when the owner signals stop.

use async_trait::async_trait;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::SampleFormat;
use std::collections::VecDeque;
use std::sync::{mpsc as std_mpsc, Arc, Mutex};
use std::thread::JoinHandle;
use tokio::sync::{mpsc, oneshot};
use tracing::{info, warn};

use super::backend::{CaptureBackend, CaptureConstraints};
use super::convert;
use super::player::{AudioPlayer, PlaybackBuffer, PlaybackCompletion};
use crate::error::{Result, VoiceError};

fn map_build_error(e: cpal::BuildStreamError) -> VoiceError {
    match e {
        cpal::BuildStreamError::DeviceNotAvailable => VoiceError::DeviceUnavailable {
            message: "audio device is no longer available".to_string(),
        },
        cpal::BuildStreamError::StreamConfigNotSupported => VoiceError::DeviceUnavailable {
            message: "audio device rejected the stream configuration".to_string(),
        },
        other => VoiceError::PermissionDenied {
            message: other.to_string(),
        },
    }
}

fn map_config_error(e: cpal::DefaultStreamConfigError) -> VoiceError {
    match e {
        cpal::DefaultStreamConfigError::BackendSpecific { err } => VoiceError::PermissionDenied {
            message: err.to_string(),
        },
        other => VoiceError::DeviceUnavailable {
            message: other.to_string(),
        },
    }
}

fn map_play_error(e: cpal::PlayStreamError) -> VoiceError {
    match e {
        cpal::PlayStreamError::DeviceNotAvailable => VoiceError::DeviceUnavailable {
            message: "audio device is no longer available".to_string(),
        },
        other => VoiceError::PermissionDenied {
            message: other.to_string(),
        },
    }
}

/// Default input device, converted to mono at the requested rate
#[derive(Default)]
pub struct CpalCapture {
    stop_tx: Option<std_mpsc::Sender<()>>,
    thread: Option<JoinHandle<()>>,
}

impl CpalCapture {
    pub fn new() -> Self {
        Self::default()
    }
}

fn build_input_stream(target_rate: u32, tx: mpsc::Sender<Vec<f32>>) -> Result<cpal::Stream> {
    let host = cpal::default_host();
    let device = host
        .default_input_device()
        .ok_or_else(|| VoiceError::DeviceUnavailable {
            message: "no default input device".to_string(),
        })?;

    let supported = device.default_input_config().map_err(map_config_error)?;
    let native_rate = supported.sample_rate().0;
    let channels = supported.channels();
    let config: cpal::StreamConfig = supported.config();

    info!(
        "Opening microphone {} ({}ch/{}Hz/{:?})",
        device.name().unwrap_or_else(|_| "unknown".to_string()),
        channels,
        native_rate,
        supported.sample_format()
    );

    let err_fn = |err| warn!("Microphone stream error: {}", err);

    let stream = match supported.sample_format() {
        SampleFormat::F32 => device.build_input_stream(
            &config,
            move |data: &[f32], _: &cpal::InputCallbackInfo| {
                let block = convert::to_mono_at_rate(data, channels, native_rate, target_rate);
                let _ = tx.try_send(block);
            },
            err_fn,
            None,
        ),
        SampleFormat::I16 => device.build_input_stream(
            &config,
            move |data: &[i16], _: &cpal::InputCallbackInfo| {
                let floats: Vec<f32> = data.iter().map(|&s| s as f32 / 32768.0).collect();
                let block = convert::to_mono_at_rate(&floats, channels, native_rate, target_rate);
                let _ = tx.try_send(block);
            },
            err_fn,
            None,
        ),
        other => {
            return Err(VoiceError::DeviceUnavailable {
                message: format!("unsupported input sample format {:?}", other),
            })
        }
    };

    stream.map_err(map_build_error)
}

#[async_trait]
impl CaptureBackend for CpalCapture {
    async fn start(&mut self, constraints: &CaptureConstraints) -> Result<mpsc::Receiver<Vec<f32>>> {
        if self.stop_tx.is_some() {
            return Err(VoiceError::DeviceUnavailable {
                message: "microphone is already in use by this session".to_string(),
            });
        }

        let (tx, rx) = mpsc::channel(64);
        let (ready_tx, ready_rx) = oneshot::channel::<Result<()>>();
        let (stop_tx, stop_rx) = std_mpsc::channel::<()>();
        let target_rate = constraints.sample_rate;

        let thread = std::thread::Builder::new()
            .name("cpal-capture".to_string())
            .spawn(move || {
                let stream = match build_input_stream(target_rate, tx) {
                    Ok(stream) => stream,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                if let Err(e) = stream.play() {
                    let _ = ready_tx.send(Err(map_play_error(e)));
                    return;
                }
                let _ = ready_tx.send(Ok(()));

                // Park until stop() or the owner is dropped
                let _ = stop_rx.recv();
                drop(stream);
            })?;

        match ready_rx.await {
            Ok(Ok(())) => {
                self.stop_tx = Some(stop_tx);
                self.thread = Some(thread);
                info!("Microphone capture started");
                Ok(rx)
            }
            Ok(Err(e)) => {
                let _ = thread.join();
                Err(e)
            }
            Err(_) => Err(VoiceError::DeviceUnavailable {
                message: "capture thread exited before the stream started".to_string(),
            }),
        }
    }

    async fn stop(&mut self) -> Result<()> {
        if let Some(stop_tx) = self.stop_tx.take() {
            let _ = stop_tx.send(());
        }
        if let Some(thread) = self.thread.take() {
            let _ = tokio::task::spawn_blocking(move || thread.join()).await;
            info!("Microphone capture stopped");
        }
        Ok(())
    }

    fn is_capturing(&self) -> bool {
        self.stop_tx.is_some()
    }

    fn name(&self) -> &str {
        "cpal-microphone"
    }
}

#[derive(Default)]
struct OutputState {
    samples: VecDeque<f32>,
    completion: Option<PlaybackCompletion>,
}

/// Default output device
pub struct CpalPlayer {
    state: Arc<Mutex<OutputState>>,
    device_rate: u32,
    stop_tx: Option<std_mpsc::Sender<()>>,
    thread: Option<JoinHandle<()>>,
}

impl CpalPlayer {
    pub fn open() -> Result<Self> {
        let state = Arc::new(Mutex::new(OutputState::default()));
        let (ready_tx, ready_rx) = std_mpsc::sync_channel::<Result<u32>>(1);
        let (stop_tx, stop_rx) = std_mpsc::channel::<()>();
        let shared = Arc::clone(&state);

        let thread = std::thread::Builder::new()
            .name("cpal-output".to_string())
            .spawn(move || {
                let stream = match build_output_stream(shared) {
                    Ok(pair) => pair,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                let (stream, rate) = stream;
                if let Err(e) = stream.play() {
                    let _ = ready_tx.send(Err(map_play_error(e)));
                    return;
                }
                let _ = ready_tx.send(Ok(rate));
                let _ = stop_rx.recv();
                drop(stream);
            })?;

        let device_rate = match ready_rx.recv() {
            Ok(Ok(rate)) => rate,
            Ok(Err(e)) => {
                let _ = thread.join();
                return Err(e);
            }
            Err(_) => {
                return Err(VoiceError::DeviceUnavailable {
                    message: "output thread exited before the stream started".to_string(),
                })
            }
        };

        Ok(Self {
            state,
            device_rate,
            stop_tx: Some(stop_tx),
            thread: Some(thread),
        })
    }
}

fn build_output_stream(state: Arc<Mutex<OutputState>>) -> Result<(cpal::Stream, u32)> {
    let host = cpal::default_host();
    let device = host
        .default_output_device()
        .ok_or_else(|| VoiceError::DeviceUnavailable {
            message: "no default output device".to_string(),
        })?;

    let supported = device.default_output_config().map_err(map_config_error)?;
    if supported.sample_format() != SampleFormat::F32 {
        return Err(VoiceError::DeviceUnavailable {
            message: format!("unsupported output sample format {:?}", supported.sample_format()),
        });
    }

    let rate = supported.sample_rate().0;
    let channels = supported.channels() as usize;
    let config: cpal::StreamConfig = supported.config();

    let stream = device
        .build_output_stream(
            &config,
            move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                let Ok(mut state) = state.lock() else {
                    data.fill(0.0);
                    return;
                };
                for frame in data.chunks_mut(channels.max(1)) {
                    let sample = state.samples.pop_front().unwrap_or(0.0);
                    frame.fill(sample);
                }
                if state.samples.is_empty() {
                    if let Some(completion) = state.completion.take() {
                        completion.finished();
                    }
                }
            },
            |err| warn!("Speaker stream error: {}", err),
            None,
        )
        .map_err(map_build_error)?;

    Ok((stream, rate))
}

impl AudioPlayer for CpalPlayer {
    fn play(&mut self, buffer: PlaybackBuffer, completion: PlaybackCompletion) -> Result<()> {
        let samples = convert::resample_linear(&buffer.samples, buffer.sample_rate, self.device_rate);
        let mut state = self.state.lock().map_err(|_| VoiceError::Playback {
            message: "output state poisoned".to_string(),
        })?;
        state.samples.extend(samples);
        state.completion = Some(completion);
        Ok(())
    }

    fn stop(&mut self) {
        if let Ok(mut state) = self.state.lock() {
            state.samples.clear();
            state.completion = None;
        }
    }

    fn name(&self) -> &str {
        "cpal-speaker"
    }
}

impl Drop for CpalPlayer {
    fn drop(&mut self) {
        if let Some(stop_tx) = self.stop_tx.take() {
            let _ = stop_tx.send(());
        }
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}
