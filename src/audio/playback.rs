//! Playback pipeline: inbound PCM16 fragments rendered one at a time, FIFO.
//!
//! The queue itself is a pure state machine (`Idle → Playing → Idle`);
//! [`PlaybackPipeline`] drives an [`AudioPlayer`] from its transitions.

use std::collections::VecDeque;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use super::backend::AudioFrame;
use super::pcm;
use super::player::{AudioPlayer, PlaybackBuffer, PlaybackCompletion, PlaybackDone};

/// A frame that just became the one in flight
#[derive(Debug, Clone, PartialEq)]
pub struct Started<T> {
    pub ticket: u64,
    pub frame: T,
}

/// Result of a completion report
#[derive(Debug, Clone, PartialEq)]
pub enum Transition<T> {
    /// Next queued frame is now in flight
    Next(Started<T>),
    /// Queue empty, nothing in flight
    Drained,
    /// Report for a frame that is no longer in flight
    Stale,
}

/// FIFO of frames awaiting playback with at most one in flight
#[derive(Debug)]
pub struct PlaybackQueue<T> {
    queue: VecDeque<T>,
    in_flight: Option<u64>,
    next_ticket: u64,
}

impl<T> Default for PlaybackQueue<T> {
    fn default() -> Self {
        Self {
            queue: VecDeque::new(),
            in_flight: None,
            next_ticket: 0,
        }
    }
}

impl<T> PlaybackQueue<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a frame; starts it right away when idle
    pub fn enqueue(&mut self, frame: T) -> Option<Started<T>> {
        self.queue.push_back(frame);
        if self.in_flight.is_none() {
            self.start_next()
        } else {
            None
        }
    }

    /// The frame with `ticket` finished (or failed)
    pub fn on_frame_complete(&mut self, ticket: u64) -> Transition<T> {
        if self.in_flight != Some(ticket) {
            return Transition::Stale;
        }

        self.in_flight = None;
        match self.start_next() {
            Some(started) => Transition::Next(started),
            None => Transition::Drained,
        }
    }

    /// Drop everything, including the frame in flight
    pub fn reset(&mut self) {
        self.queue.clear();
        self.in_flight = None;
    }

    /// True while a frame is in flight or waiting
    pub fn is_speaking(&self) -> bool {
        self.in_flight.is_some() || !self.queue.is_empty()
    }

    pub fn in_flight(&self) -> Option<u64> {
        self.in_flight
    }

    /// Frames waiting behind the one in flight
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    fn start_next(&mut self) -> Option<Started<T>> {
        let frame = self.queue.pop_front()?;
        let ticket = self.next_ticket;
        self.next_ticket += 1;
        self.in_flight = Some(ticket);
        Some(Started { ticket, frame })
    }
}

/// Drives an audio player from a queue of raw PCM16 payloads
pub struct PlaybackPipeline {
    queue: PlaybackQueue<Vec<u8>>,
    player: Box<dyn AudioPlayer>,
    sample_rate: u32,
    done_tx: mpsc::UnboundedSender<PlaybackDone>,
    done_rx: mpsc::UnboundedReceiver<PlaybackDone>,
    frames_played: usize,
    frames_failed: usize,
}

impl PlaybackPipeline {
    pub fn new(player: Box<dyn AudioPlayer>, sample_rate: u32) -> Self {
        let (done_tx, done_rx) = mpsc::unbounded_channel();
        Self {
            queue: PlaybackQueue::new(),
            player,
            sample_rate,
            done_tx,
            done_rx,
            frames_played: 0,
            frames_failed: 0,
        }
    }

    /// Queue one inbound fragment, starting playback when idle
    pub fn enqueue(&mut self, pcm_bytes: Vec<u8>) {
        if let Some(started) = self.queue.enqueue(pcm_bytes) {
            self.begin(started);
        }
    }

    /// Wait for the player to report a finished frame
    pub async fn next_completion(&mut self) -> Option<PlaybackDone> {
        self.done_rx.recv().await
    }

    /// Apply a completion report
    pub fn on_frame_complete(&mut self, done: PlaybackDone) {
        if self.queue.in_flight() != Some(done.ticket) {
            debug!("Ignoring stale playback completion {}", done.ticket);
            return;
        }

        match &done.result {
            Ok(()) => self.frames_played += 1,
            Err(e) => {
                warn!("Playback of frame {} failed: {}", done.ticket, e);
                self.frames_failed += 1;
            }
        }

        self.advance(done.ticket);
    }

    /// Stop audio immediately and forget everything queued
    pub fn reset(&mut self) {
        if self.queue.is_speaking() {
            debug!(
                "Resetting playback ({} queued, in flight: {:?})",
                self.queue.len(),
                self.queue.in_flight()
            );
        }
        self.queue.reset();
        self.player.stop();
    }

    pub fn is_speaking(&self) -> bool {
        self.queue.is_speaking()
    }

    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    pub fn frames_played(&self) -> usize {
        self.frames_played
    }

    pub fn frames_failed(&self) -> usize {
        self.frames_failed
    }

    pub fn player_name(&self) -> &str {
        self.player.name()
    }

    fn advance(&mut self, ticket: u64) {
        match self.queue.on_frame_complete(ticket) {
            Transition::Next(started) => self.begin(started),
            Transition::Drained => debug!("Playback queue drained"),
            Transition::Stale => {}
        }
    }

    /// Decode and hand a frame to the player; failures skip to the next frame
    fn begin(&mut self, mut started: Started<Vec<u8>>) {
        loop {
            let ticket = started.ticket;
            let outcome = AudioFrame::from_bytes(&started.frame, self.sample_rate).and_then(|frame| {
                let buffer = PlaybackBuffer {
                    samples: pcm::pcm16_to_playback(&frame.samples),
                    sample_rate: frame.sample_rate,
                };
                let completion = PlaybackCompletion::new(ticket, self.done_tx.clone());
                self.player.play(buffer, completion)
            });

            let Err(e) = outcome else {
                return;
            };

            warn!("Skipping audio frame {}: {}", ticket, e);
            self.frames_failed += 1;

            match self.queue.on_frame_complete(ticket) {
                Transition::Next(next) => started = next,
                Transition::Drained | Transition::Stale => return,
            }
        }
    }
}
