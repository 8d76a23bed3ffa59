use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;

use crate::{Result, Transport, TransportError, TransportKind};

/// An in-process transport backed by flume channels.
///
/// Useful for tests and when both ends of a "system" live in the same
/// process. Created in connected pairs; what one side sends the other side
/// receives.
pub struct InProcessTransport {
    connected: bool,
    tx: flume::Sender<Value>,
    rx: flume::Receiver<Value>,
    poll_timeout: Duration,
}

impl InProcessTransport {
    /// Create a pair of connected in-process transports.
    pub fn pair() -> (Self, Self) {
        let (tx_a, rx_b) = flume::unbounded();
        let (tx_b, rx_a) = flume::unbounded();

        let make = |tx, rx| Self {
            connected: true,
            tx,
            rx,
            poll_timeout: Duration::from_millis(10),
        };
        (make(tx_a, rx_a), make(tx_b, rx_b))
    }
}

#[async_trait]
impl Transport for InProcessTransport {
    fn kind(&self) -> TransportKind {
        // In-process pairs stand in for a websocket peer in tests.
        TransportKind::WebSocket
    }

    fn is_connected(&self) -> bool {
        self.connected
    }

    async fn connect(&mut self) -> Result<()> {
        self.connected = true;
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<()> {
        self.connected = false;
        Ok(())
    }

    async fn send(&mut self, message: &Value) -> Result<()> {
        if !self.connected {
            self.connect().await?;
        }
        self.tx.send_async(message.clone()).await.map_err(|e| {
            self.connected = false;
            TransportError::SendFailed(e.to_string())
        })
    }

    async fn receive(&mut self) -> Result<Option<Value>> {
        if !self.connected {
            self.connect().await?;
        }
        match tokio::time::timeout(self.poll_timeout, self.rx.recv_async()).await {
            Ok(Ok(value)) => Ok(Some(value)),
            Ok(Err(_)) => {
                self.connected = false;
                Err(TransportError::ConnectionClosed)
            }
            Err(_) => Ok(None),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
