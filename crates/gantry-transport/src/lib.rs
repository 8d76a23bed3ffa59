//! Pluggable transports for reaching external systems.
//!
//! The [`Transport`] trait is the only seam the orchestrator sees; new kinds
//! are added by implementing it, never by branching inside the dispatch
//! loop. Implementations reconnect lazily on `send`/`receive`, flip their
//! connected flag on any I/O error, and return failures as values. Retry
//! policy belongs to the caller.

use async_trait::async_trait;
use serde_json::Value;

pub use gantry_core::types::TransportKind;

pub mod http;
pub mod in_process;
pub mod websocket;

pub use http::HttpTransport;
pub use in_process::InProcessTransport;
pub use websocket::WebSocketTransport;

// ---------------------------------------------------------------------------
// Transport errors
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("connect failed: {0}")]
    ConnectFailed(String),

    #[error("send failed: {0}")]
    SendFailed(String),

    #[error("receive failed: {0}")]
    ReceiveFailed(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("connection closed")]
    ConnectionClosed,

    #[error("timeout after {0}ms")]
    Timeout(u64),
}

pub type Result<T> = std::result::Result<T, TransportError>;

// ---------------------------------------------------------------------------
// Transport trait
// ---------------------------------------------------------------------------

/// A live channel to one external system.
///
/// `send` delivers one JSON document; `receive` yields the next inbound
/// document, or `None` when nothing is currently available. Both lazily
/// (re)establish the connection when it is down, and both are bounded by the
/// transport's configured timeout.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Which backend this transport speaks.
    fn kind(&self) -> TransportKind;

    /// Current connection state.
    fn is_connected(&self) -> bool;

    /// Establish the connection.
    async fn connect(&mut self) -> Result<()>;

    /// Tear the connection down.
    async fn disconnect(&mut self) -> Result<()>;

    /// Deliver one outbound document.
    async fn send(&mut self, message: &Value) -> Result<()>;

    /// Fetch the next inbound document, if any.
    async fn receive(&mut self) -> Result<Option<Value>>;
}
