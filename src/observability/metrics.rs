//! OpenTelemetry metrics for the archive.
//!
//! Key metrics:
//! - archive_messages_added_total: Counter of messages written by `add`
//! - archive_messages_removed_total: Counter of messages deleted by `remove`
//! - archive_aggregate_recomputes_total: Counter of aggregate computations
//! - archive_write_latency_seconds: Histogram of write transaction latency

use opentelemetry::metrics::{Counter, Histogram, Meter};
use opentelemetry::{global, KeyValue};
use opentelemetry_sdk::metrics::{ManualReader, SdkMeterProvider};
use std::sync::OnceLock;

/// Global metrics instance.
static METRICS: OnceLock<Metrics> = OnceLock::new();

/// Archive metrics registry.
#[derive(Debug)]
pub struct Metrics {
    /// Total number of messages written.
    pub messages_added: Counter<u64>,
    /// Total number of messages deleted.
    pub messages_removed: Counter<u64>,
    /// Total number of aggregate computations, by aggregate.
    pub aggregate_recomputes: Counter<u64>,
    /// Histogram of write latency in seconds, by operation.
    pub write_latency: Histogram<f64>,
}

impl Metrics {
    fn new(meter: &Meter) -> Self {
        Self {
            messages_added: meter
                .u64_counter("archive_messages_added_total")
                .with_description("Total number of messages written")
                .with_unit("1")
                .init(),
            messages_removed: meter
                .u64_counter("archive_messages_removed_total")
                .with_description("Total number of messages deleted")
                .with_unit("1")
                .init(),
            aggregate_recomputes: meter
                .u64_counter("archive_aggregate_recomputes_total")
                .with_description("Total number of aggregate computations")
                .with_unit("1")
                .init(),
            write_latency: meter
                .f64_histogram("archive_write_latency_seconds")
                .with_description("Write latency from connection acquisition to commit")
                .with_unit("s")
                .init(),
        }
    }
}

/// Initialize the metrics system.
///
/// This should be called once at startup. Subsequent calls are ignored.
///
/// # Arguments
///
/// * `otel_endpoint` - Optional OTLP endpoint for metrics export
pub fn init_metrics_with_endpoint(otel_endpoint: Option<&str>) {
    METRICS.get_or_init(|| {
        if let Some(endpoint) = otel_endpoint {
            use opentelemetry_otlp::{Protocol, WithExportConfig};

            let exporter = opentelemetry_otlp::new_exporter()
                .tonic()
                .with_endpoint(endpoint)
                .with_protocol(Protocol::Grpc);

            match opentelemetry_otlp::new_pipeline()
                .metrics(opentelemetry_sdk::runtime::Tokio)
                .with_exporter(exporter)
                .with_period(std::time::Duration::from_secs(10))
                .build()
            {
                Ok(provider) => {
                    global::set_meter_provider(provider);
                    tracing::info!(endpoint, "OTLP metrics exporter configured");
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Failed to create OTLP exporter, metrics stay local");
                    install_manual_reader();
                }
            }
        } else {
            // Metrics are recorded but not exported
            install_manual_reader();
        }

        let meter = global::meter("chat_archive");
        Metrics::new(&meter)
    });
}

fn install_manual_reader() {
    let reader = ManualReader::builder().build();
    let provider = SdkMeterProvider::builder().with_reader(reader).build();
    global::set_meter_provider(provider);
}

/// Initialize the metrics system without OTLP export.
pub fn init_metrics() {
    init_metrics_with_endpoint(None);
}

/// Record a committed `add` batch.
pub fn record_messages_added(count: usize, latency_seconds: f64) {
    if let Some(m) = METRICS.get() {
        let attrs = [KeyValue::new("operation", "add")];
        m.messages_added.add(count as u64, &attrs);
        m.write_latency.record(latency_seconds, &attrs);
    }
}

/// Record a committed `remove`.
pub fn record_messages_removed(count: usize, latency_seconds: f64) {
    if let Some(m) = METRICS.get() {
        let attrs = [KeyValue::new("operation", "remove")];
        m.messages_removed.add(count as u64, &attrs);
        m.write_latency.record(latency_seconds, &attrs);
    }
}

/// Record one aggregate computation.
pub fn record_aggregate_recompute(aggregate: &'static str) {
    if let Some(m) = METRICS.get() {
        m.aggregate_recomputes
            .add(1, &[KeyValue::new("aggregate", aggregate)]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_metrics_is_idempotent() {
        init_metrics();
        init_metrics();
        assert!(METRICS.get().is_some());
    }

    #[test]
    fn test_recording_does_not_panic() {
        init_metrics();
        record_messages_added(3, 0.002);
        record_messages_removed(1, 0.001);
        record_aggregate_recompute("total_messages");
    }
}
