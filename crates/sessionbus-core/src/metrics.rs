//! `OpenTelemetry` export and relay counters.
//!
//! This module is only compiled when the `metrics` Cargo feature is enabled.
//! It sets up the OTLP exporter for both traces and metrics and exposes the
//! counters the relay increments on its hot paths.

use std::sync::OnceLock;

use opentelemetry::global;
use opentelemetry::metrics::Counter;
use opentelemetry::trace::TracerProvider as _;
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::metrics::SdkMeterProvider;
use opentelemetry_sdk::trace::{SdkTracerProvider, Tracer};

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

/// Keeps the `OpenTelemetry` providers alive.
///
/// Dropping the guard does not flush; call [`MetricsGuard::shutdown`].
pub struct MetricsGuard {
    tracer_provider: SdkTracerProvider,
    meter_provider: SdkMeterProvider,
}

impl std::fmt::Debug for MetricsGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetricsGuard").finish_non_exhaustive()
    }
}

impl MetricsGuard {
    /// Tracer for the `tracing-opentelemetry` layer.
    pub fn tracer(&self, name: &'static str) -> Tracer {
        self.tracer_provider.tracer(name)
    }

    /// Gracefully shut down both providers, flushing any buffered telemetry.
    pub fn shutdown(self) -> Result<(), MetricsError> {
        self.tracer_provider.shutdown()?;
        self.meter_provider.shutdown()?;
        Ok(())
    }
}

/// Initialise the OTLP pipeline for traces and metrics.
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

/// Counters incremented by the session relay.
pub struct RelayInstruments {
    /// Inbound envelopes published on a request channel.
    pub enqueued: Counter<u64>,
    /// Outbound envelopes that reached at least one waiting caller.
    pub published: Counter<u64>,
    /// Outbound envelopes published with nobody waiting.
    pub dropped: Counter<u64>,
    /// `await_outbound` calls that hit their deadline.
    pub timeouts: Counter<u64>,
}

/// Lazily created relay counters on the global meter provider.
pub fn relay_instruments() -> &'static RelayInstruments {
    static INSTRUMENTS: OnceLock<RelayInstruments> = OnceLock::new();
    INSTRUMENTS.get_or_init(|| {
        let meter = global::meter("sessionbus");
        RelayInstruments {
            enqueued: meter.u64_counter("sessionbus.inbound.enqueued").build(),
            published: meter.u64_counter("sessionbus.outbound.published").build(),
            dropped: meter.u64_counter("sessionbus.outbound.dropped").build(),
            timeouts: meter.u64_counter("sessionbus.await.timeouts").build(),
        }
    })
}
