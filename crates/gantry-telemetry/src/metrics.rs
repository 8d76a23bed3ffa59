use ahash::AHashMap;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::RwLock;

// ---------------------------------------------------------------------------
// Histogram
// ---------------------------------------------------------------------------

/// A histogram that tracks the distribution of observed values across buckets.
#[derive(Debug)]
pub struct Histogram {
    pub buckets: Vec<f64>,
    pub counts: Vec<AtomicU64>,
    pub sum: AtomicU64,
    pub count: AtomicU64,
}

impl Histogram {
    /// Create a new histogram with the given bucket boundaries.
    pub fn new(buckets: Vec<f64>) -> Self {
        let counts = buckets.iter().map(|_| AtomicU64::new(0)).collect();
        Self {
            buckets,
            counts,
            sum: AtomicU64::new(0),
            count: AtomicU64::new(0),
        }
    }

    /// Record a value into the histogram.
    pub fn observe(&self, value: f64) {
        self.count.fetch_add(1, Ordering::Relaxed);
        // Store sum as bits so we can do atomic add on f64
        loop {
            let current = self.sum.load(Ordering::Relaxed);
            let new_f = f64::from_bits(current) + value;
            match self.sum.compare_exchange_weak(
                current,
                new_f.to_bits(),
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => break,
                Err(_) => continue,
            }
        }
        for (i, boundary) in self.buckets.iter().enumerate() {
            if value <= *boundary {
                self.counts[i].fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    pub fn get_sum(&self) -> f64 {
        f64::from_bits(self.sum.load(Ordering::Relaxed))
    }

    pub fn get_count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }
}

/// Default operation-duration buckets (in seconds).
fn default_duration_buckets() -> Vec<f64> {
    vec![
        0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
    ]
}

// ---------------------------------------------------------------------------
// Labels
// ---------------------------------------------------------------------------

/// A label set is a sorted list of key=value pairs, used to distinguish
/// metric families.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Labels(Vec<(String, String)>);

impl Labels {
    pub fn new(pairs: &[(&str, &str)]) -> Self {
        let mut v: Vec<(String, String)> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        v.sort_by(|a, b| a.0.cmp(&b.0));
        Self(v)
    }

    pub fn empty() -> Self {
        Self(Vec::new())
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Format labels as `{key="value",key2="value2"}` for Prometheus output.
    pub fn prometheus_str(&self) -> String {
        if self.0.is_empty() {
            return String::new();
        }
        let inner: Vec<String> = self
            .0
            .iter()
            .map(|(k, v)| format!("{}=\"{}\"", k, v))
            .collect();
        format!("{{{}}}", inner.join(","))
    }

    /// Same, with one extra pair appended (used for histogram `le` bounds).
    fn prometheus_str_with(&self, extra_key: &str, extra_value: &str) -> String {
        let mut inner: Vec<String> = self
            .0
            .iter()
            .map(|(k, v)| format!("{}=\"{}\"", k, v))
            .collect();
        inner.push(format!("{}=\"{}\"", extra_key, extra_value));
        format!("{{{}}}", inner.join(","))
    }
}

// ---------------------------------------------------------------------------
// MetricsCollector
// ---------------------------------------------------------------------------

type Keyed<T> = RwLock<AHashMap<(String, Labels), T>>;

/// Central metrics collector supporting counters, gauges, and histograms,
/// all keyed by `(name, labels)`.
///
/// Thread-safe via interior mutability (`RwLock` for dynamic registration,
/// `Atomic*` for values). Every recording method swallows internal failures:
/// metrics must never take delivery down with them.
#[derive(Debug, Default)]
pub struct MetricsCollector {
    counters: Keyed<AtomicU64>,
    gauges: Keyed<AtomicI64>,
    histograms: Keyed<Histogram>,
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self::default()
    }

    // -- Counters -----------------------------------------------------------

    /// Increment a counter by 1.
    pub fn increment_counter(&self, name: &str, labels: &[(&str, &str)]) {
        self.increment_counter_by(name, labels, 1);
    }

    /// Increment a counter by an arbitrary amount.
    pub fn increment_counter_by(&self, name: &str, labels: &[(&str, &str)], amount: u64) {
        let key = (name.to_string(), Labels::new(labels));
        // Fast-path: read lock
        {
            let Ok(map) = self.counters.read() else { return };
            if let Some(c) = map.get(&key) {
                c.fetch_add(amount, Ordering::Relaxed);
                return;
            }
        }
        // Slow-path: write lock to insert
        let Ok(mut map) = self.counters.write() else { return };
        let c = map.entry(key).or_insert_with(|| AtomicU64::new(0));
        c.fetch_add(amount, Ordering::Relaxed);
    }

    /// Get the current value of a counter.
    pub fn get_counter(&self, name: &str, labels: &[(&str, &str)]) -> u64 {
        let key = (name.to_string(), Labels::new(labels));
        self.counters
            .read()
            .ok()
            .and_then(|map| map.get(&key).map(|c| c.load(Ordering::Relaxed)))
            .unwrap_or(0)
    }

    // -- Gauges -------------------------------------------------------------

    /// Set a gauge to an absolute value.
    pub fn set_gauge(&self, name: &str, labels: &[(&str, &str)], value: i64) {
        let key = (name.to_string(), Labels::new(labels));
        {
            let Ok(map) = self.gauges.read() else { return };
            if let Some(g) = map.get(&key) {
                g.store(value, Ordering::Relaxed);
                return;
            }
        }
        let Ok(mut map) = self.gauges.write() else { return };
        let g = map.entry(key).or_insert_with(|| AtomicI64::new(0));
        g.store(value, Ordering::Relaxed);
    }

    /// Get the current value of a gauge.
    pub fn get_gauge(&self, name: &str, labels: &[(&str, &str)]) -> i64 {
        let key = (name.to_string(), Labels::new(labels));
        self.gauges
            .read()
            .ok()
            .and_then(|map| map.get(&key).map(|g| g.load(Ordering::Relaxed)))
            .unwrap_or(0)
    }

    // -- Histograms ---------------------------------------------------------

    /// Record a value into a histogram. If the histogram does not exist it is
    /// created with default duration buckets.
    pub fn record_histogram(&self, name: &str, labels: &[(&str, &str)], value: f64) {
        let key = (name.to_string(), Labels::new(labels));
        {
            let Ok(map) = self.histograms.read() else { return };
            if let Some(h) = map.get(&key) {
                h.observe(value);
                return;
            }
        }
        let Ok(mut map) = self.histograms.write() else { return };
        let h = map
            .entry(key)
            .or_insert_with(|| Histogram::new(default_duration_buckets()));
        h.observe(value);
    }

    // -- Export --------------------------------------------------------------

    /// Export all metrics in Prometheus text exposition format.
    pub fn export_prometheus(&self) -> String {
        let mut out = String::new();

        if let Ok(map) = self.counters.read() {
            let mut grouped: AHashMap<&str, Vec<(&Labels, u64)>> = AHashMap::new();
            for ((name, labels), val) in map.iter() {
                grouped
                    .entry(name.as_str())
                    .or_default()
                    .push((labels, val.load(Ordering::Relaxed)));
            }
            let mut names: Vec<&&str> = grouped.keys().collect();
            names.sort();
            for name in names {
                out.push_str(&format!("# TYPE {} counter\n", name));
                let mut entries = grouped[*name].clone();
                entries.sort_by_key(|(labels, _)| labels.prometheus_str());
                for (labels, value) in entries {
                    out.push_str(&format!("{}{} {}\n", name, labels.prometheus_str(), value));
                }
            }
        }

        if let Ok(map) = self.gauges.read() {
            let mut grouped: AHashMap<&str, Vec<(&Labels, i64)>> = AHashMap::new();
            for ((name, labels), val) in map.iter() {
                grouped
                    .entry(name.as_str())
                    .or_default()
                    .push((labels, val.load(Ordering::Relaxed)));
            }
            let mut names: Vec<&&str> = grouped.keys().collect();
            names.sort();
            for name in names {
                out.push_str(&format!("# TYPE {} gauge\n", name));
                let mut entries = grouped[*name].clone();
                entries.sort_by_key(|(labels, _)| labels.prometheus_str());
                for (labels, value) in entries {
                    out.push_str(&format!("{}{} {}\n", name, labels.prometheus_str(), value));
                }
            }
        }

        if let Ok(map) = self.histograms.read() {
            let mut keys: Vec<&(String, Labels)> = map.keys().collect();
            keys.sort_by_key(|(name, labels)| (name.clone(), labels.prometheus_str()));
            let mut last_name = "";
            for key in keys {
                let (name, labels) = key;
                let h = &map[key];
                if name.as_str() != last_name {
                    out.push_str(&format!("# TYPE {} histogram\n", name));
                    last_name = name.as_str();
                }
                let mut cumulative = 0u64;
                for (i, boundary) in h.buckets.iter().enumerate() {
                    cumulative += h.counts[i].load(Ordering::Relaxed);
                    out.push_str(&format!(
                        "{}_bucket{} {}\n",
                        name,
                        labels.prometheus_str_with("le", &boundary.to_string()),
                        cumulative
                    ));
                }
                out.push_str(&format!(
                    "{}_bucket{} {}\n",
                    name,
                    labels.prometheus_str_with("le", "+Inf"),
                    h.get_count()
                ));
                out.push_str(&format!(
                    "{}_sum{} {}\n",
                    name,
                    labels.prometheus_str(),
                    h.get_sum()
                ));
                out.push_str(&format!(
                    "{}_count{} {}\n",
                    name,
                    labels.prometheus_str(),
                    h.get_count()
                ));
            }
        }

        out
    }

    /// Export all metrics as a JSON value.
    pub fn export_json(&self) -> serde_json::Value {
        let mut counters_json = serde_json::Map::new();
        if let Ok(map) = self.counters.read() {
            for ((name, labels), val) in map.iter() {
                counters_json.insert(
                    format!("{}{}", name, labels.prometheus_str()),
                    serde_json::json!(val.load(Ordering::Relaxed)),
                );
            }
        }

        let mut gauges_json = serde_json::Map::new();
        if let Ok(map) = self.gauges.read() {
            for ((name, labels), val) in map.iter() {
                gauges_json.insert(
                    format!("{}{}", name, labels.prometheus_str()),
                    serde_json::json!(val.load(Ordering::Relaxed)),
                );
            }
        }

        let mut histograms_json = serde_json::Map::new();
        if let Ok(map) = self.histograms.read() {
            for ((name, labels), h) in map.iter() {
                let buckets: Vec<serde_json::Value> = h
                    .buckets
                    .iter()
                    .enumerate()
                    .map(|(i, b)| {
                        serde_json::json!({
                            "le": b,
                            "count": h.counts[i].load(Ordering::Relaxed),
                        })
                    })
                    .collect();
                histograms_json.insert(
                    format!("{}{}", name, labels.prometheus_str()),
                    serde_json::json!({
                        "buckets": buckets,
                        "sum": h.get_sum(),
                        "count": h.get_count(),
                    }),
                );
            }
        }

        serde_json::json!({
            "counters": counters_json,
            "gauges": gauges_json,
            "histograms": histograms_json,
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counter_increment() {
        let m = MetricsCollector::new();
        m.increment_counter("messages_sent_total", &[("status", "ok")]);
        m.increment_counter("messages_sent_total", &[("status", "ok")]);
        m.increment_counter("messages_sent_total", &[("status", "failed")]);

        assert_eq!(m.get_counter("messages_sent_total", &[("status", "ok")]), 2);
        assert_eq!(
            m.get_counter("messages_sent_total", &[("status", "failed")]),
            1
        );
        assert_eq!(
            m.get_counter("messages_sent_total", &[("status", "dropped")]),
            0
        );
    }

    #[test]
    fn counter_label_order_is_irrelevant() {
        let m = MetricsCollector::new();
        m.increment_counter("sent", &[("system", "crm"), ("status", "ok")]);
        assert_eq!(
            m.get_counter("sent", &[("status", "ok"), ("system", "crm")]),
            1
        );
    }

    #[test]
    fn gauge_set_and_overwrite() {
        let m = MetricsCollector::new();
        m.set_gauge("queue_size", &[("system", "crm")], 5);
        assert_eq!(m.get_gauge("queue_size", &[("system", "crm")]), 5);
        m.set_gauge("queue_size", &[("system", "crm")], 3);
        assert_eq!(m.get_gauge("queue_size", &[("system", "crm")]), 3);
        assert_eq!(m.get_gauge("queue_size", &[("system", "erp")]), 0);
    }

    #[test]
    fn histogram_record() {
        let m = MetricsCollector::new();
        let labels = [("system", "crm"), ("operation", "send")];
        m.record_histogram("operation_duration_seconds", &labels, 0.05);
        m.record_histogram("operation_duration_seconds", &labels, 0.5);
        m.record_histogram("operation_duration_seconds", &labels, 2.0);

        let map = m.histograms.read().unwrap();
        let key = (
            "operation_duration_seconds".to_string(),
            Labels::new(&labels),
        );
        let h = map.get(&key).unwrap();
        assert_eq!(h.get_count(), 3);
        assert!((h.get_sum() - 2.55).abs() < 0.001);
    }

    #[test]
    fn prometheus_export() {
        let m = MetricsCollector::new();
        m.increment_counter("messages_sent_total", &[("system", "crm"), ("status", "ok")]);
        m.set_gauge("queue_size", &[("system", "crm")], 2);
        m.record_histogram("operation_duration_seconds", &[("system", "crm")], 0.1);

        let output = m.export_prometheus();
        assert!(output.contains("# TYPE messages_sent_total counter"));
        assert!(output.contains("messages_sent_total{status=\"ok\",system=\"crm\"} 1"));
        assert!(output.contains("# TYPE queue_size gauge"));
        assert!(output.contains("queue_size{system=\"crm\"} 2"));
        assert!(output.contains("# TYPE operation_duration_seconds histogram"));
        assert!(output.contains("operation_duration_seconds_count{system=\"crm\"} 1"));
        assert!(output.contains("le=\"+Inf\""));
    }

    #[test]
    fn json_export() {
        let m = MetricsCollector::new();
        m.increment_counter("sent", &[("system", "crm")]);
        m.set_gauge("connections", &[("system", "crm")], 1);

        let json = m.export_json();
        assert_eq!(json["counters"]["sent{system=\"crm\"}"], 1);
        assert_eq!(json["gauges"]["connections{system=\"crm\"}"], 1);
    }

    #[test]
    fn labels_prometheus_format() {
        let l = Labels::new(&[("system", "crm"), ("status", "ok")]);
        assert_eq!(l.prometheus_str(), "{status=\"ok\",system=\"crm\"}");
        assert_eq!(Labels::empty().prometheus_str(), "");
        assert_eq!(
            Labels::empty().prometheus_str_with("le", "0.5"),
            "{le=\"0.5\"}"
        );
    }
}
