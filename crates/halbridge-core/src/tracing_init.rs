//! Tracing/logging initialization.
//!
//! Logs are written to stderr; the daemon's stdout carries chat output.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

fn env_filter(default_filter: &str) -> tracing_subscriber::EnvFilter {
    tracing_subscriber::EnvFilter::new(
        std::env::var("RUST_LOG").unwrap_or_else(|_| default_filter.into()),
    )
}

/// Initialise the global tracing subscriber.
///
/// * `default_filter` -- default `RUST_LOG` value when the env-var is not set
///   (e.g. `"halbridge_daemon=info"`).
/// * `log_json` -- when `true`, emit structured JSON log lines instead of the
///   human-readable format.
pub fn init_tracing(default_filter: &str, log_json: bool) {
    if log_json {
        tracing_subscriber::registry()
            .with(env_filter(default_filter))
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(std::io::stderr),
            )
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter(default_filter))
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}

/// Initialise tracing and, when an endpoint is given, the OTLP pipeline.
///
/// Spans are exported through `tracing-opentelemetry`. The returned guard
/// must be kept alive for the lifetime of the process.
#[cfg(feature = "metrics")]
#[allow(clippy::print_stderr)]
pub fn init_tracing_with_metrics(
    default_filter: &str,
    log_json: bool,
    endpoint: Option<&str>,
) -> Option<crate::metrics::MetricsGuard> {
    use opentelemetry::trace::TracerProvider as _;

    let guard = endpoint.and_then(|endpoint| match crate::metrics::init_metrics(endpoint) {
        Ok(guard) => Some(guard),
        Err(e) => {
            // No subscriber is installed yet.
            eprintln!("Failed to initialise OpenTelemetry pipeline: {e}");
            None
        }
    });
    let otel = guard.as_ref().map(|g| {
        tracing_opentelemetry::layer().with_tracer(g.tracer_provider().tracer("halbridge"))
    });

    if log_json {
        tracing_subscriber::registry()
            .with(env_filter(default_filter))
            .with(otel)
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(std::io::stderr),
            )
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter(default_filter))
            .with(otel)
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }
    guard
}

/// Without the `metrics` feature the endpoint is ignored.
#[cfg(not(feature = "metrics"))]
pub fn init_tracing_with_metrics(default_filter: &str, log_json: bool, _endpoint: Option<&str>) {
    init_tracing(default_filter, log_json);
}
