//! The gantry orchestrator: one facade over authentication, validation,
//! rate limiting, queueing, transformation, transports, and metrics.
//!
//! Key modules:
//! - [`bridge`] — the [`Bridge`] facade and its background dispatch loop
//! - [`metrics`] — domain metric recording over the generic collector
//! - [`metrics_http`] — the pull-based observability endpoint
//! - [`shutdown`] — cooperative shutdown coordination

pub mod bridge;
pub mod metrics;
pub mod metrics_http;
pub mod shutdown;

pub use bridge::{Bridge, BridgeError, SendError};
pub use gantry_core::types::{SystemStatus, TransportStatus};
