//! Observability infrastructure for the gantry bridge.
//!
//! - **Logging**: human-readable and JSON output via `tracing-subscriber`
//! - **Metrics**: thread-safe counters, gauges, and histograms with
//!   Prometheus text and JSON export
//!
//! Metric recording is fire-and-forget by contract: a failure inside the
//! collector degrades to a dropped sample and never reaches delivery code.

pub mod logging;
pub mod metrics;
