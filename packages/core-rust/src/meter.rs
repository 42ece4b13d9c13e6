//! Narrow metrics capability: one duration sample per finished operation.

use std::fmt;
use std::time::Duration;

/// Service names used to key metric samples and span attributes.
pub mod service_names {
    pub const KV: &str = "kv";
    pub const QUERY: &str = "query";
    pub const SEARCH: &str = "search";
    pub const MANAGEMENT: &str = "management";
}

/// Histogram recording operation latency in microseconds.
pub const OPERATION_DURATION_METRIC: &str = "db.client.operation.duration";

/// Records operation durations.
pub trait Meter: Send + Sync + fmt::Debug {
    /// Record one sample for `operation` on `service`.
    fn value_record(&self, service: &'static str, operation: &str, duration: Duration);
}

/// Meter backed by the `metrics` facade.
#[derive(Debug, Clone, Copy, Default)]
pub struct MetricsMeter;

impl Meter for MetricsMeter {
    fn value_record(&self, service: &'static str, operation: &str, duration: Duration) {
        metrics::histogram!(
            OPERATION_DURATION_METRIC,
            "db.couchbase.service" => service,
            "db.operation" => operation.to_string(),
        )
        .record(duration.as_secs_f64() * 1_000_000.0);
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoopMeter;

impl Meter for NoopMeter {
    fn value_record(&self, _service: &'static str, _operation: &str, _duration: Duration) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metrics_meter_records_without_installed_recorder() {
        // No global recorder is installed, so the sample is dropped silently.
        MetricsMeter.value_record(service_names::KV, "get", Duration::from_millis(3));
        NoopMeter.value_record(service_names::QUERY, "query", Duration::ZERO);
    }
}
