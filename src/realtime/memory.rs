//! In-process connector with a scriptable remote peer.
//!
//! Every `open()` hands a [`RemotePeer`] to whoever holds the peer receiver,
//! which can read what the session sent and answer with server messages.

use anyhow::{bail, Result};
use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

use super::channel::{Channel, ChannelEvent, Connector, OUTBOUND_CAPACITY};
use super::messages::{ClientMessage, ServerMessage};

/// How the next `open()` behaves
#[derive(Debug, Clone, PartialEq)]
pub enum OpenBehavior {
    Accept,
    /// Fail with the given message
    Refuse(String),
}

pub struct MemoryConnector {
    peers: mpsc::UnboundedSender<RemotePeer>,
    open_delay: Duration,
    behavior: Mutex<OpenBehavior>,
    opened: Arc<AtomicUsize>,
}

impl MemoryConnector {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<RemotePeer>) {
        let (peers, peer_rx) = mpsc::unbounded_channel();
        let connector = Self {
            peers,
            open_delay: Duration::ZERO,
            behavior: Mutex::new(OpenBehavior::Accept),
            opened: Arc::new(AtomicUsize::new(0)),
        };
        (connector, peer_rx)
    }

    /// Delay each handshake, to observe the `connecting` state
    pub fn with_open_delay(mut self, delay: Duration) -> Self {
        self.open_delay = delay;
        self
    }

    pub fn set_behavior(&self, behavior: OpenBehavior) {
        if let Ok(mut current) = self.behavior.lock() {
            *current = behavior;
        }
    }

    /// Number of channels successfully opened so far
    pub fn open_count(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Connector for MemoryConnector {
    async fn open(&self) -> Result<Channel> {
        if !self.open_delay.is_zero() {
            tokio::time::sleep(self.open_delay).await;
        }

        let behavior = self
            .behavior
            .lock()
            .map(|b| b.clone())
            .unwrap_or(OpenBehavior::Accept);
        if let OpenBehavior::Refuse(message) = behavior {
            bail!("{}", message);
        }

        let (outbound_tx, outbound_rx) = mpsc::channel(OUTBOUND_CAPACITY);
        let (inbound_tx, inbound_rx) = mpsc::channel(256);

        let peer = RemotePeer {
            from_client: outbound_rx,
            to_client: inbound_tx,
        };
        if self.peers.send(peer).is_err() {
            bail!("no remote peer is listening");
        }

        self.opened.fetch_add(1, Ordering::SeqCst);
        Ok(Channel::new(outbound_tx, inbound_rx))
    }

    fn endpoint(&self) -> String {
        "memory://realtime".to_string()
    }
}

/// The server side of an in-memory channel
pub struct RemotePeer {
    from_client: mpsc::Receiver<String>,
    to_client: mpsc::Sender<ChannelEvent>,
}

impl RemotePeer {
    /// Next message the session sent; `None` once the session closed
    pub async fn recv(&mut self) -> Option<ClientMessage> {
        loop {
            let raw = self.from_client.recv().await?;
            if let Ok(message) = serde_json::from_str(&raw) {
                return Some(message);
            }
        }
    }

    /// Next message if one is already queued
    pub fn try_recv(&mut self) -> Option<ClientMessage> {
        let raw = self.from_client.try_recv().ok()?;
        serde_json::from_str(&raw).ok()
    }

    pub async fn send(&self, message: &ServerMessage) -> bool {
        match message.to_json() {
            Ok(json) => self.send_raw(json).await,
            Err(_) => false,
        }
    }

    /// Send text verbatim, including malformed payloads
    pub async fn send_raw(&self, json: impl Into<String>) -> bool {
        self.to_client
            .send(ChannelEvent::Message(json.into()))
            .await
            .is_ok()
    }

    /// Simulate the remote dropping the connection
    pub async fn close(self, reason: Option<String>) {
        let _ = self.to_client.send(ChannelEvent::Closed { reason }).await;
    }

    /// Whether the session side has closed the channel
    pub fn is_closed(&self) -> bool {
        self.to_client.is_closed()
    }
}
