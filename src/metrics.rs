use std::sync::Arc;

use lazy_static::lazy_static;
use prometheus::{register_int_counter, register_int_counter_vec, IntCounter, IntCounterVec};

lazy_static! {
    static ref OPERATIONS: IntCounterVec = register_int_counter_vec!(
        "treefs_operations_total",
        "Filesystem operations started, by operation",
        &["op"]
    )
    .unwrap();
    static ref OPERATION_ERRORS: IntCounterVec = register_int_counter_vec!(
        "treefs_operation_errors_total",
        "Filesystem operations failed, by operation and error code",
        &["op", "code"]
    )
    .unwrap();
    static ref BYTES_RECEIVED: IntCounter = register_int_counter!(
        "treefs_bytes_received_total",
        "Bytes written to the content store"
    )
    .unwrap();
    static ref BYTES_SENT: IntCounter = register_int_counter!(
        "treefs_bytes_sent_total",
        "Bytes read back from the content store"
    )
    .unwrap();
    static ref RECORDS_CREATED: IntCounter = register_int_counter!(
        "treefs_records_created_total",
        "Metadata records created, including copies"
    )
    .unwrap();
    static ref RECORDS_DESTROYED: IntCounter = register_int_counter!(
        "treefs_records_destroyed_total",
        "Metadata records removed"
    )
    .unwrap();
    static ref BLOBS_DROPPED: IntCounter = register_int_counter!(
        "treefs_blobs_dropped_total",
        "Blobs removed from the content store"
    )
    .unwrap();
}

/// Metrics collector interface
///
/// The library only talks to this trait; the binary plugs in the
/// Prometheus collector, tests use the no-op one.
pub trait MetricsCollector: Send + Sync {
    fn operation(&self, op: &'static str);
    fn operation_failed(&self, op: &'static str, code: &'static str);
    fn bytes_received(&self, amount: usize);
    fn bytes_sent(&self, amount: usize);
    fn records_created(&self, amount: u64);
    fn records_destroyed(&self, amount: u64);
    fn blobs_dropped(&self, amount: u64);
}

/// No-op metrics collector (default)
#[derive(Debug, Clone, Default)]
pub struct NoOpMetrics;

impl MetricsCollector for NoOpMetrics {
    fn operation(&self, _op: &'static str) {}
    fn operation_failed(&self, _op: &'static str, _code: &'static str) {}
    fn bytes_received(&self, _amount: usize) {}
    fn bytes_sent(&self, _amount: usize) {}
    fn records_created(&self, _amount: u64) {}
    fn records_destroyed(&self, _amount: u64) {}
    fn blobs_dropped(&self, _amount: u64) {}
}

/// Collector backed by the default Prometheus registry.
#[derive(Debug, Clone, Default)]
pub struct PrometheusMetrics;

impl MetricsCollector for PrometheusMetrics {
    fn operation(&self, op: &'static str) {
        OPERATIONS.with_label_values(&[op]).inc();
    }

    fn operation_failed(&self, op: &'static str, code: &'static str) {
        OPERATION_ERRORS.with_label_values(&[op, code]).inc();
    }

    fn bytes_received(&self, amount: usize) {
        BYTES_RECEIVED.inc_by(amount as u64);
    }

    fn bytes_sent(&self, amount: usize) {
        BYTES_SENT.inc_by(amount as u64);
    }

    fn records_created(&self, amount: u64) {
        RECORDS_CREATED.inc_by(amount);
    }

    fn records_destroyed(&self, amount: u64) {
        RECORDS_DESTROYED.inc_by(amount);
    }

    fn blobs_dropped(&self, amount: u64) {
        BLOBS_DROPPED.inc_by(amount);
    }
}

/// Shared reference to metrics collector
#[derive(Clone)]
pub struct SharedMetrics(Arc<dyn MetricsCollector>);

impl SharedMetrics {
    pub fn new(collector: Arc<dyn MetricsCollector>) -> Self {
        Self(collector)
    }

    pub fn prometheus() -> Self {
        Self(Arc::new(PrometheusMetrics))
    }

    pub fn operation(&self, op: &'static str) {
        self.0.operation(op);
    }

    pub fn operation_failed(&self, op: &'static str, code: &'static str) {
        self.0.operation_failed(op, code);
    }

    pub fn bytes_received(&self, amount: usize) {
        self.0.bytes_received(amount);
    }

    pub fn bytes_sent(&self, amount: usize) {
        self.0.bytes_sent(amount);
    }

    pub fn records_created(&self, amount: u64) {
        self.0.records_created(amount);
    }

    pub fn records_destroyed(&self, amount: u64) {
        self.0.records_destroyed(amount);
    }

    pub fn blobs_dropped(&self, amount: u64) {
        self.0.blobs_dropped(amount);
    }
}

impl Default for SharedMetrics {
    fn default() -> Self {
        Self(Arc::new(NoOpMetrics))
    }
}

impl std::fmt::Debug for SharedMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SharedMetrics")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prometheus_counters() {
        let metrics = SharedMetrics::prometheus();
        let before = BYTES_RECEIVED.get();
        metrics.bytes_received(128);
        assert!(BYTES_RECEIVED.get() >= before + 128);

        metrics.operation("create");
        assert!(OPERATIONS.with_label_values(&["create"]).get() >= 1);
    }
}
