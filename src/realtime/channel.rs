use async_trait::async_trait;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::messages::ClientMessage;
use crate::error::Result;

/// Messages the transport may hold before the writer flushes them
pub const OUTBOUND_CAPACITY: usize = 16;

/// Slots audio frames may never take, so control messages still fit
const CONTROL_RESERVE: usize = 4;

/// Something that happened on an open channel
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelEvent {
    /// One JSON text message from the remote endpoint
    Message(String),
    /// The remote side went away
    Closed { reason: Option<String> },
}

/// One bidirectional text channel to the realtime endpoint
///
/// Outbound messages share one bounded, ordered queue flushed by the
/// transport's writer. Audio only uses the queue while it has headroom;
/// the last `CONTROL_RESERVE` slots are kept for control messages.
/// Inbound events arrive on a bounded receiver.
pub struct Channel {
    outbound: Option<mpsc::Sender<String>>,
    inbound: mpsc::Receiver<ChannelEvent>,
    reader: Option<JoinHandle<()>>,
    /// Tells the writer to stop flushing; dropped on close
    shutdown: Option<oneshot::Sender<()>>,
}

impl Channel {
    pub fn new(outbound: mpsc::Sender<String>, inbound: mpsc::Receiver<ChannelEvent>) -> Self {
        Self {
            outbound: Some(outbound),
            inbound,
            reader: None,
            shutdown: None,
        }
    }

    /// Attach the task feeding `inbound`, aborted on close
    pub fn with_reader(mut self, reader: JoinHandle<()>) -> Self {
        self.reader = Some(reader);
        self
    }

    /// Attach the writer's stop signal, fired on close
    pub fn with_shutdown(mut self, shutdown: oneshot::Sender<()>) -> Self {
        self.shutdown = Some(shutdown);
        self
    }

    /// Queue a control message.
    ///
    /// Returns `Ok(false)` when the channel is closed or the queue is full.
    pub fn send(&self, message: &ClientMessage) -> Result<bool> {
        let json = message.to_json()?;
        Ok(self.send_raw(json))
    }

    /// Queue one audio frame if the writer keeps up.
    ///
    /// Returns `Ok(false)` without queueing when only the control reserve
    /// is left or the channel is closed.
    pub fn send_audio(&self, message: &ClientMessage) -> Result<bool> {
        let Some(outbound) = &self.outbound else {
            return Ok(false);
        };
        if outbound.capacity() <= CONTROL_RESERVE {
            return Ok(false);
        }
        Ok(outbound.try_send(message.to_json()?).is_ok())
    }

    pub fn send_raw(&self, json: String) -> bool {
        let Some(outbound) = &self.outbound else {
            return false;
        };
        match outbound.try_send(json) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                warn!("Realtime channel backlog is full, dropping control message");
                false
            }
            Err(TrySendError::Closed(_)) => false,
        }
    }

    /// Next inbound event; `None` once the reader is gone
    pub async fn recv(&mut self) -> Option<ChannelEvent> {
        self.inbound.recv().await
    }

    /// Close the channel. Nothing received afterwards is observable, and
    /// nothing still queued is sent.
    pub fn close(mut self) {
        self.outbound.take();
        self.shutdown.take();
        self.inbound.close();
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
        debug!("Realtime channel closed locally");
    }
}

impl Drop for Channel {
    fn drop(&mut self) {
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
    }
}

/// Opens channels to a realtime endpoint
#[async_trait]
pub trait Connector: Send + Sync {
    /// Open a new channel
    async fn open(&self) -> anyhow::Result<Channel>;

    /// Endpoint description for logging
    fn endpoint(&self) -> String;
}
