//! Shared tracing/logging initialization.
//!
//! The relay binary and any embedding application use the same pattern for
//! setting up `tracing_subscriber` with an env-filter and optional JSON output.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Handle returned by [`init_tracing_with_metrics`]; keep it alive for the
/// lifetime of the process.
#[cfg(feature = "metrics")]
pub type TelemetryGuard = crate::metrics::MetricsGuard;

/// Handle returned by [`init_tracing_with_metrics`] when the `metrics`
/// feature is disabled. Carries nothing.
#[cfg(not(feature = "metrics"))]
#[derive(Debug)]
pub struct TelemetryGuard;

fn env_filter(default_filter: &str) -> tracing_subscriber::EnvFilter {
    tracing_subscriber::EnvFilter::new(
        std::env::var("RUST_LOG").unwrap_or_else(|_| default_filter.into()),
    )
}

/// Initialise the global tracing subscriber.
///
/// * `default_filter` -- default `RUST_LOG` value when the env-var is not set
///   (e.g. `"sessionbus_relay=info"`).
/// * `log_json` -- when `true`, emit structured JSON log lines instead of the
///   human-readable format.
pub fn init_tracing(default_filter: &str, log_json: bool) {
    let filter = env_filter(default_filter);
    if log_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }
}

/// Like [`init_tracing`], additionally exporting spans and metrics over OTLP
/// when `metrics_endpoint` is set and the `metrics` feature is enabled.
#[cfg(feature = "metrics")]
pub fn init_tracing_with_metrics(
    default_filter: &str,
    log_json: bool,
    metrics_endpoint: Option<&str>,
) -> Option<TelemetryGuard> {
    let Some(endpoint) = metrics_endpoint else {
        init_tracing(default_filter, log_json);
        return None;
    };

    let guard = match crate::metrics::init_metrics(endpoint) {
        Ok(guard) => guard,
        Err(e) => {
            init_tracing(default_filter, log_json);
            tracing::warn!(error = %e, endpoint, "OTLP pipeline unavailable, continuing without it");
            return None;
        }
    };

    let otel = tracing_opentelemetry::layer().with_tracer(guard.tracer("sessionbus"));
    let filter = env_filter(default_filter);
    if log_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(otel)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(otel)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }
    tracing::info!(endpoint, "OTLP export enabled");
    Some(guard)
}

/// Like [`init_tracing`]; the endpoint is ignored without the `metrics` feature.
#[cfg(not(feature = "metrics"))]
pub fn init_tracing_with_metrics(
    default_filter: &str,
    log_json: bool,
    metrics_endpoint: Option<&str>,
) -> Option<TelemetryGuard> {
    init_tracing(default_filter, log_json);
    if let Some(endpoint) = metrics_endpoint {
        tracing::warn!(endpoint, "built without the `metrics` feature, OTLP export disabled");
    }
    None
}
