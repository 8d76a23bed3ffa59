use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::{Bytes, Message};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, warn};

use crate::{Result, Transport, TransportError, TransportKind};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

const DEFAULT_KEEPALIVE: Duration = Duration::from_secs(30);

/// WebSocket transport: one long-lived duplex connection, one JSON document
/// per text frame.
///
/// The connection is established lazily on first use and re-established
/// after any I/O error. Keep-alive pings piggyback on `send`: when the
/// connection has idled past the keep-alive interval, a ping precedes the
/// next outbound frame.
pub struct WebSocketTransport {
    url: String,
    timeout: Duration,
    keepalive: Duration,
    stream: Option<WsStream>,
    last_io: Instant,
}

impl WebSocketTransport {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            url: url.into(),
            timeout,
            keepalive: DEFAULT_KEEPALIVE,
            stream: None,
            last_io: Instant::now(),
        }
    }

    pub fn with_keepalive(mut self, keepalive: Duration) -> Self {
        self.keepalive = keepalive;
        self
    }

    async fn ensure_connected(&mut self) -> Result<()> {
        if self.stream.is_none() {
            self.connect().await?;
        }
        Ok(())
    }

    /// Ping when the connection has been idle past the keep-alive interval.
    async fn maybe_keepalive(&mut self) -> Result<()> {
        if self.last_io.elapsed() < self.keepalive {
            return Ok(());
        }
        let stream = self.stream.as_mut().ok_or(TransportError::ConnectionClosed)?;
        match stream.send(Message::Ping(Bytes::new())).await {
            Ok(()) => {
                self.last_io = Instant::now();
                Ok(())
            }
            Err(e) => {
                self.stream = None;
                Err(TransportError::SendFailed(format!("keep-alive: {e}")))
            }
        }
    }
}

#[async_trait]
impl Transport for WebSocketTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::WebSocket
    }

    fn is_connected(&self) -> bool {
        self.stream.is_some()
    }

    async fn connect(&mut self) -> Result<()> {
        let connected = tokio::time::timeout(self.timeout, connect_async(self.url.as_str()))
            .await
            .map_err(|_| TransportError::Timeout(self.timeout.as_millis() as u64))?
            .map_err(|e| TransportError::ConnectFailed(e.to_string()))?;

        debug!(url = %self.url, "websocket connected");
        self.stream = Some(connected.0);
        self.last_io = Instant::now();
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<()> {
        if let Some(mut stream) = self.stream.take() {
            // Best-effort close; the connection is gone either way.
            if let Err(e) = stream.close(None).await {
                warn!(url = %self.url, error = %e, "error closing websocket");
            }
        }
        Ok(())
    }

    async fn send(&mut self, message: &Value) -> Result<()> {
        self.ensure_connected().await?;
        self.maybe_keepalive().await?;

        let text = serde_json::to_string(message)
            .map_err(|e| TransportError::Serialization(e.to_string()))?;

        let stream = self.stream.as_mut().ok_or(TransportError::ConnectionClosed)?;
        let outcome =
            tokio::time::timeout(self.timeout, stream.send(Message::Text(text.into()))).await;

        match outcome {
            Ok(Ok(())) => {
                self.last_io = Instant::now();
                Ok(())
            }
            Ok(Err(e)) => {
                self.stream = None;
                Err(TransportError::SendFailed(e.to_string()))
            }
            Err(_) => {
                self.stream = None;
                Err(TransportError::Timeout(self.timeout.as_millis() as u64))
            }
        }
    }

    async fn receive(&mut self) -> Result<Option<Value>> {
        self.ensure_connected().await?;

        let deadline = tokio::time::Instant::now() + self.timeout;
        loop {
            let stream = self.stream.as_mut().ok_or(TransportError::ConnectionClosed)?;
            let frame = match tokio::time::timeout_at(deadline, stream.next()).await {
                // Nothing arrived within the window: not a failure.
                Err(_) => return Ok(None),
                Ok(None) => {
                    self.stream = None;
                    return Err(TransportError::ConnectionClosed);
                }
                Ok(Some(Err(e))) => {
                    self.stream = None;
                    return Err(TransportError::ReceiveFailed(e.to_string()));
                }
                Ok(Some(Ok(frame))) => frame,
            };

            match frame {
                Message::Text(text) => {
                    self.last_io = Instant::now();
                    let value: Value = serde_json::from_str(text.as_str())
                        .map_err(|e| TransportError::Serialization(e.to_string()))?;
                    return Ok(Some(value));
                }
                Message::Binary(bytes) => {
                    self.last_io = Instant::now();
                    let value: Value = serde_json::from_slice(&bytes)
                        .map_err(|e| TransportError::Serialization(e.to_string()))?;
                    return Ok(Some(value));
                }
                // Pong replies to pings are queued automatically by the
                // stream; control frames just keep the loop going.
                Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => continue,
                Message::Close(_) => {
                    self.stream = None;
                    return Err(TransportError::ConnectionClosed);
                }
            }
        }
    }
}
