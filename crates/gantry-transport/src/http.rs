use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, warn};

use crate::{Result, Transport, TransportError, TransportKind};

/// HTTP transport: one `POST {base_url}` per outbound message, long-poll
/// `GET {base_url}/messages` for inbound.
///
/// Any 2xx response is a successful send; a 204 or empty poll body means
/// nothing is available. The client itself is stateless, so "connected"
/// tracks whether the last I/O attempt reached the endpoint.
pub struct HttpTransport {
    client: reqwest::Client,
    base_url: String,
    timeout: Duration,
    connected: bool,
}

impl HttpTransport {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| TransportError::ConnectFailed(e.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.into(),
            timeout,
            connected: false,
        })
    }

    fn classify(&mut self, err: reqwest::Error, sending: bool) -> TransportError {
        self.connected = false;
        if err.is_timeout() {
            TransportError::Timeout(self.timeout.as_millis() as u64)
        } else if sending {
            TransportError::SendFailed(err.to_string())
        } else {
            TransportError::ReceiveFailed(err.to_string())
        }
    }
}

#[async_trait]
impl Transport for HttpTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Http
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

        let request = self.client.post(&self.base_url).json(message);
        let resp = match request.send().await {
            Ok(resp) => resp,
            Err(e) => return Err(self.classify(e, true)),
        };

        let status = resp.status();
        if status.is_success() {
            debug!(url = %self.base_url, %status, "message posted");
            Ok(())
        } else {
            warn!(url = %self.base_url, %status, "endpoint rejected message");
            Err(TransportError::SendFailed(format!("status {status}")))
        }
    }

    async fn receive(&mut self) -> Result<Option<Value>> {
        if !self.connected {
            self.connect().await?;
        }

        let url = format!("{}/messages", self.base_url);
        let request = self.client.get(&url);
        let resp = match request.send().await {
            Ok(resp) => resp,
            Err(e) => return Err(self.classify(e, false)),
        };

        let status = resp.status();
        if status == reqwest::StatusCode::NO_CONTENT {
            return Ok(None);
        }
        if !status.is_success() {
            return Err(TransportError::ReceiveFailed(format!("status {status}")));
        }

        let body = match resp.bytes().await {
            Ok(body) => body,
            Err(e) => return Err(self.classify(e, false)),
        };
        if body.is_empty() {
            return Ok(None);
        }
        let value: Value = serde_json::from_slice(&body)
            .map_err(|e| TransportError::Serialization(e.to_string()))?;
        Ok(Some(value))
    }
}
