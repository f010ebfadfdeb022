use anyhow::{Context, Result};
use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::AUTHORIZATION;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

use super::channel::{Channel, ChannelEvent, Connector, OUTBOUND_CAPACITY};

/// Inbound events buffered per channel
const INBOUND_CAPACITY: usize = 256;

/// Connects to the realtime relay over a WebSocket
#[derive(Debug, Clone)]
pub struct WebSocketConnector {
    url: String,
    auth_token: Option<String>,
}

impl WebSocketConnector {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            auth_token: None,
        }
    }

    /// Send `Authorization: Bearer <token>` on the upgrade request
    pub fn with_auth_token(mut self, token: impl Into<String>) -> Self {
        self.auth_token = Some(token.into());
        self
    }
}

#[async_trait]
impl Connector for WebSocketConnector {
    async fn open(&self) -> Result<Channel> {
        info!("Connecting to realtime endpoint at {}", self.url);

        let mut request = self
            .url
            .as_str()
            .into_client_request()
            .context("Invalid realtime endpoint URL")?;

        if let Some(token) = &self.auth_token {
            let value = HeaderValue::from_str(&format!("Bearer {}", token))
                .context("Auth token is not a valid header value")?;
            request.headers_mut().insert(AUTHORIZATION, value);
        }

        let (stream, response) = connect_async(request)
            .await
            .context("Failed to connect to realtime endpoint")?;

        info!("Connected to realtime endpoint (HTTP {})", response.status());

        let (mut write, mut read) = stream.split();
        let (outbound_tx, mut outbound_rx) = mpsc::channel::<String>(OUTBOUND_CAPACITY);
        let (inbound_tx, inbound_rx) = mpsc::channel(INBOUND_CAPACITY);
        let (shutdown_tx, mut shutdown_rx) = oneshot::channel::<()>();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    // Fires on close or drop; whatever is still queued is discarded
                    _ = &mut shutdown_rx => break,
                    text = outbound_rx.recv() => match text {
                        Some(text) => {
                            if let Err(e) = write.send(Message::Text(text)).await {
                                warn!("Failed to write to realtime endpoint: {}", e);
                                return;
                            }
                        }
                        None => break,
                    },
                }
            }

            if let Err(e) = write.close().await {
                debug!("Error while closing realtime socket: {}", e);
            }
            debug!("Realtime writer task stopped");
        });

        let reader = tokio::spawn(async move {
            let reason = loop {
                match read.next().await {
                    Some(Ok(Message::Text(text))) => {
                        if inbound_tx.send(ChannelEvent::Message(text)).await.is_err() {
                            return;
                        }
                    }
                    Some(Ok(Message::Close(frame))) => {
                        break frame.map(|f| f.reason.to_string());
                    }
                    Some(Ok(Message::Binary(bytes))) => {
                        debug!("Ignoring {} byte binary frame", bytes.len());
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => break Some(e.to_string()),
                    None => break None,
                }
            };

            info!("Realtime endpoint closed the channel: {:?}", reason);
            let _ = inbound_tx.send(ChannelEvent::Closed { reason }).await;
        });

        Ok(Channel::new(outbound_tx, inbound_rx)
            .with_reader(reader)
            .with_shutdown(shutdown_tx))
    }

    fn endpoint(&self) -> String {
        self.url.clone()
    }
}
