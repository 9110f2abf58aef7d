//! `OpenTelemetry` metrics for the bridge.
//!
//! This module is only compiled when the `metrics` Cargo feature is enabled.
//! It sets up the OTLP exporter for both traces and metrics and defines the
//! counters the daemon records protocol health with.

use opentelemetry::KeyValue;
use opentelemetry::global;
use opentelemetry::metrics::Counter;
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::metrics::SdkMeterProvider;
use opentelemetry_sdk::trace::SdkTracerProvider;

use crate::admission::SkipReason;

/// Errors that can occur during metrics / tracing pipeline initialisation.
#[derive(Debug, thiserror::Error)]
pub enum MetricsError {
    /// Failed to build an OTLP exporter.
    #[error("failed to build OTLP exporter: {0}")]
    ExporterBuild(#[from] opentelemetry_otlp::ExporterBuildError),

    /// Failed during `OTel` SDK shutdown or flush.
    #[error("OpenTelemetry SDK error: {0}")]
    Sdk(#[from] opentelemetry_sdk::error::OTelSdkError),
}

/// Opaque handle that keeps the `OpenTelemetry` providers alive.
///
/// When dropped, the providers are **not** shut down automatically -- call
/// [`MetricsGuard::shutdown`] for a graceful flush before exiting.
pub struct MetricsGuard {
    tracer_provider: SdkTracerProvider,
    meter_provider: SdkMeterProvider,
}

impl MetricsGuard {
    pub const fn tracer_provider(&self) -> &SdkTracerProvider {
        &self.tracer_provider
    }

    /// Gracefully shut down both providers, flushing any buffered telemetry.
    pub fn shutdown(self) -> Result<(), MetricsError> {
        self.tracer_provider.shutdown()?;
        self.meter_provider.shutdown()?;
        Ok(())
    }
}

/// Initialise the `OpenTelemetry` OTLP pipeline for traces **and** metrics.
///
/// * `endpoint` -- OTLP receiver URL, e.g. `"http://localhost:4317"` (gRPC).
pub fn init_metrics(endpoint: &str) -> Result<MetricsGuard, MetricsError> {
    let trace_exporter = opentelemetry_otlp::SpanExporter::builder()
        .with_tonic()
        .with_endpoint(endpoint)
        .build()?;

    let tracer_provider = SdkTracerProvider::builder()
        .with_batch_exporter(trace_exporter)
        .build();

    global::set_tracer_provider(tracer_provider.clone());

    let metric_exporter = opentelemetry_otlp::MetricExporter::builder()
        .with_tonic()
        .with_endpoint(endpoint)
        .build()?;

    let meter_provider = SdkMeterProvider::builder()
        .with_periodic_exporter(metric_exporter)
        .build();

    global::set_meter_provider(meter_provider.clone());

    Ok(MetricsGuard {
        tracer_provider,
        meter_provider,
    })
}

/// Counters recorded by the bridge event loop.
#[derive(Clone)]
pub struct BridgeMetrics {
    sends: Counter<u64>,
    checkpoints: Counter<u64>,
    replies: Counter<u64>,
    unsolicited: Counter<u64>,
    skipped: Counter<u64>,
}

impl Default for BridgeMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl BridgeMetrics {
    /// Create counters on the global meter provider.
    pub fn new() -> Self {
        let meter = global::meter("halbridge");
        Self {
            sends: meter.u64_counter("halbridge.sends").build(),
            checkpoints: meter.u64_counter("halbridge.checkpoints").build(),
            replies: meter.u64_counter("halbridge.replies").build(),
            unsolicited: meter.u64_counter("halbridge.unsolicited_lines").build(),
            skipped: meter.u64_counter("halbridge.skipped_messages").build(),
        }
    }

    pub fn record_send(&self) {
        self.sends.add(1, &[]);
    }

    pub fn record_checkpoint(&self) {
        self.checkpoints.add(1, &[]);
    }

    pub fn record_output(&self, replies: u64, unsolicited: u64) {
        if replies > 0 {
            self.replies.add(replies, &[]);
        }
        if unsolicited > 0 {
            self.unsolicited.add(unsolicited, &[]);
        }
    }

    pub fn record_skip(&self, reason: SkipReason) {
        let reason = match reason {
            SkipReason::ContainsUrl => "url",
            SkipReason::TooShort => "too_short",
            SkipReason::CommandPrefix => "command_prefix",
        };
        self.skipped.add(1, &[KeyValue::new("reason", reason)]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    #[allow(clippy::unwrap_used)]
    async fn init_metrics_does_not_panic() {
        // Dummy endpoint: the exporter only fails at send time.
        let guard = init_metrics("http://localhost:4317").unwrap();
        BridgeMetrics::new().record_skip(SkipReason::TooShort);
        guard.shutdown().unwrap();
    }
}
