//! Nullable metrics facade over a `prometheus` registry.
//!
//! The hub and watcher hold an `Arc<dyn MetricsSink>` so tests can pass
//! [`NoopMetrics`] and production wiring can pass [`PrometheusMetrics`]
//! without either caller knowing which.

use std::sync::Arc;

use prometheus::{histogram_opts, opts, HistogramVec, IntCounterVec, IntGauge, Registry};

/// Counters/gauges/histograms the core emits.
pub trait MetricsSink: Send + Sync {
    fn set_clients_connected(&self, value: i64);
    fn set_watchers_active(&self, value: i64);
    fn inc_messages_sent(&self, event_type: &str);
    fn inc_fetch_errors(&self, topic_type: &str);
    fn observe_fetch_duration(&self, topic_type: &str, seconds: f64);
}

/// A facade that does nothing; used in unit tests that don't care about
/// metrics and want to avoid wiring a registry.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopMetrics;

impl MetricsSink for NoopMetrics {
    fn set_clients_connected(&self, _value: i64) {}
    fn set_watchers_active(&self, _value: i64) {}
    fn inc_messages_sent(&self, _event_type: &str) {}
    fn inc_fetch_errors(&self, _topic_type: &str) {}
    fn observe_fetch_duration(&self, _topic_type: &str, _seconds: f64) {}
}

/// Real metrics backed by a `prometheus::Registry`, suitable for exposing at
/// `GET /metrics` via `prometheus::TextEncoder`.
pub struct PrometheusMetrics {
    clients_connected: IntGauge,
    watchers_active: IntGauge,
    messages_sent_total: IntCounterVec,
    fetch_errors_total: IntCounterVec,
    fetch_duration_seconds: HistogramVec,
}

impl PrometheusMetrics {
    /// Register all metrics into `registry`. Panics on duplicate registration,
    /// matching the `register_int_gauge!`-style helpers this is modeled on —
    /// callers are expected to build exactly one `PrometheusMetrics` per
    /// `Registry`.
    pub fn new(registry: &Registry) -> Self {
        let clients_connected =
            IntGauge::new("clients_connected", "Number of connected streaming clients")
                .expect("valid gauge opts");
        registry
            .register(Box::new(clients_connected.clone()))
            .expect("register clients_connected");

        let watchers_active = IntGauge::new("watchers_active", "Number of active topic watchers")
            .expect("valid gauge opts");
        registry
            .register(Box::new(watchers_active.clone()))
            .expect("register watchers_active");

        let messages_sent_total = IntCounterVec::new(
            opts!("messages_sent_total", "Total events sent to clients"),
            &["type"],
        )
        .expect("valid counter opts");
        registry
            .register(Box::new(messages_sent_total.clone()))
            .expect("register messages_sent_total");

        let fetch_errors_total = IntCounterVec::new(
            opts!("fetch_errors_total", "Total fetcher errors"),
            &["topic_type"],
        )
        .expect("valid counter opts");
        registry
            .register(Box::new(fetch_errors_total.clone()))
            .expect("register fetch_errors_total");

        let buckets = vec![0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.0, 5.0];
        let fetch_duration_seconds = HistogramVec::new(
            histogram_opts!(
                "fetch_duration_seconds",
                "Fetcher call duration in seconds",
                buckets
            ),
            &["topic_type"],
        )
        .expect("valid histogram opts");
        registry
            .register(Box::new(fetch_duration_seconds.clone()))
            .expect("register fetch_duration_seconds");

        Self {
            clients_connected,
            watchers_active,
            messages_sent_total,
            fetch_errors_total,
            fetch_duration_seconds,
        }
    }

    #[must_use]
    pub fn into_sink(self) -> Arc<dyn MetricsSink> {
        Arc::new(self)
    }
}

impl MetricsSink for PrometheusMetrics {
    fn set_clients_connected(&self, value: i64) {
        self.clients_connected.set(value);
    }

    fn set_watchers_active(&self, value: i64) {
        self.watchers_active.set(value);
    }

    fn inc_messages_sent(&self, event_type: &str) {
        self.messages_sent_total.with_label_values(&[event_type]).inc();
    }

    fn inc_fetch_errors(&self, topic_type: &str) {
        self.fetch_errors_total.with_label_values(&[topic_type]).inc();
    }

    fn observe_fetch_duration(&self, topic_type: &str, seconds: f64) {
        self.fetch_duration_seconds
            .with_label_values(&[topic_type])
            .observe(seconds);
    }
}
