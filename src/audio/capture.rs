//! Capture pipeline: microphone blocks → fixed-size frames → PCM16 on the wire.

use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use super::backend::{CaptureBackend, CaptureConstraints};
use super::pcm;
use crate::error::Result;
use crate::realtime::{Channel, ClientMessage};

/// Re-chunks arbitrarily sized hardware blocks into exact frames.
///
/// Holds at most one partial frame; complete frames are handed out
/// immediately, in production order.
#[derive(Debug)]
pub struct FrameAssembler {
    frame_size: usize,
    pending: Vec<f32>,
}

impl FrameAssembler {
    pub fn new(frame_size: usize) -> Self {
        let frame_size = frame_size.max(1);
        Self {
            frame_size,
            pending: Vec::with_capacity(frame_size),
        }
    }

    /// Feed a block, returning every frame it completed
    pub fn push(&mut self, mut block: &[f32]) -> Vec<Vec<f32>> {
        let mut frames = Vec::new();

        while !block.is_empty() {
            let take = (self.frame_size - self.pending.len()).min(block.len());
            self.pending.extend_from_slice(&block[..take]);
            block = &block[take..];

            if self.pending.len() == self.frame_size {
                let frame = std::mem::replace(&mut self.pending, Vec::with_capacity(self.frame_size));
                frames.push(frame);
            }
        }

        frames
    }

    /// Samples waiting for the next frame boundary
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn clear(&mut self) {
        self.pending.clear();
    }
}

/// What happened to a captured frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameOutcome {
    /// Handed to the transport
    Sent,
    /// Transport not open; frame discarded
    Dropped,
}

/// Turns capture backend output into `input_audio_buffer.append` messages
pub struct CapturePipeline {
    backend: Box<dyn CaptureBackend>,
    constraints: CaptureConstraints,
    blocks: Option<mpsc::Receiver<Vec<f32>>>,
    assembler: FrameAssembler,
}

impl CapturePipeline {
    pub fn new(backend: Box<dyn CaptureBackend>, constraints: CaptureConstraints) -> Self {
        let assembler = FrameAssembler::new(constraints.frame_size);
        Self {
            backend,
            constraints,
            blocks: None,
            assembler,
        }
    }

    /// Acquire the input device and begin producing frames
    pub async fn start(&mut self) -> Result<()> {
        if self.blocks.is_some() {
            warn!("Capture already started on {}", self.backend.name());
            return Ok(());
        }

        info!(
            "Starting capture on {} ({}Hz mono, frame={} samples, aec={}, ns={}, agc={})",
            self.backend.name(),
            self.constraints.sample_rate,
            self.constraints.frame_size,
            self.constraints.echo_cancellation,
            self.constraints.noise_suppression,
            self.constraints.auto_gain_control
        );

        let rx = self.backend.start(&self.constraints).await?;
        self.blocks = Some(rx);
        Ok(())
    }

    /// Wait for the next hardware block and return the frames it completed.
    ///
    /// Returns `None` once the backend stops delivering audio.
    pub async fn next_frames(&mut self) -> Option<Vec<Vec<f32>>> {
        let blocks = self.blocks.as_mut()?;
        let block = blocks.recv().await?;
        Some(self.assembler.push(&block))
    }

    /// Send one frame if the channel is open, otherwise drop it
    pub fn transmit(frame: &[f32], channel: Option<&Channel>) -> FrameOutcome {
        let Some(channel) = channel else {
            return FrameOutcome::Dropped;
        };

        let message = ClientMessage::audio_append(pcm::encode_frame(frame));
        match channel.send_audio(&message) {
            Ok(true) => FrameOutcome::Sent,
            Ok(false) => FrameOutcome::Dropped,
            Err(e) => {
                error!("Failed to encode capture frame: {}", e);
                FrameOutcome::Dropped
            }
        }
    }

    /// Stop the device; safe to call repeatedly.
    ///
    /// Returns the number of buffered samples that never filled a frame.
    pub async fn stop(&mut self) -> usize {
        if self.blocks.take().is_none() && !self.backend.is_capturing() {
            return 0;
        }

        let discarded = self.assembler.pending_len();
        if discarded > 0 {
            debug!("Discarding {} samples of a partial capture frame", discarded);
        }
        self.assembler.clear();
        if let Err(e) = self.backend.stop().await {
            error!("Failed to stop capture backend {}: {}", self.backend.name(), e);
        }
        debug!("Capture stopped on {}", self.backend.name());
        discarded
    }

    pub fn is_active(&self) -> bool {
        self.blocks.is_some()
    }

    pub fn backend_name(&self) -> &str {
        self.backend.name()
    }
}
