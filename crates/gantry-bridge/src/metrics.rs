use gantry_telemetry::metrics::MetricsCollector;

/// Domain metric recording for the bridge.
///
/// Thin naming layer over the generic collector; every call is
/// fire-and-forget, so a recording problem can never affect delivery.
///
/// Families:
/// - `bridge_messages_sent_total{system,status}`
/// - `bridge_messages_received_total{system,status}`
/// - `bridge_operation_duration_seconds{system,operation}`
/// - `bridge_queue_size{system}`
/// - `bridge_connections{system,transport}`
#[derive(Debug, Default)]
pub struct BridgeMetrics {
    collector: MetricsCollector,
}

impl BridgeMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// The underlying collector, for export endpoints and assertions.
    pub fn collector(&self) -> &MetricsCollector {
        &self.collector
    }

    pub fn record_sent(&self, system_id: &str, status: &str) {
        self.collector.increment_counter(
            "bridge_messages_sent_total",
            &[("system", system_id), ("status", status)],
        );
    }

    pub fn record_received(&self, system_id: &str, status: &str) {
        self.collector.increment_counter(
            "bridge_messages_received_total",
            &[("system", system_id), ("status", status)],
        );
    }

    pub fn record_latency(&self, system_id: &str, operation: &str, seconds: f64) {
        self.collector.record_histogram(
            "bridge_operation_duration_seconds",
            &[("system", system_id), ("operation", operation)],
            seconds,
        );
    }

    pub fn set_queue_size(&self, system_id: &str, size: usize) {
        self.collector
            .set_gauge("bridge_queue_size", &[("system", system_id)], size as i64);
    }

    pub fn set_connection(&self, system_id: &str, transport: &str, connected: bool) {
        self.collector.set_gauge(
            "bridge_connections",
            &[("system", system_id), ("transport", transport)],
            i64::from(connected),
        );
    }

    // -- Read-side helpers used by status handlers and tests ---------------

    pub fn sent_count(&self, system_id: &str, status: &str) -> u64 {
        self.collector.get_counter(
            "bridge_messages_sent_total",
            &[("system", system_id), ("status", status)],
        )
    }

    pub fn received_count(&self, system_id: &str, status: &str) -> u64 {
        self.collector.get_counter(
            "bridge_messages_received_total",
            &[("system", system_id), ("status", status)],
        )
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
