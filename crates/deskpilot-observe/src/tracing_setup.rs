//! Tracing initialization for the backend binary.
//!
//! Logging always goes through a structured `fmt` layer; spans are
//! additionally exported through OpenTelemetry when the operator opts in.
//! The stdout span exporter is deliberate: this is a single-operator local
//! backend, and dumping spans next to the logs beats standing up a
//! collector.

use opentelemetry::trace::TracerProvider as _;
use opentelemetry_sdk::trace::SdkTracerProvider;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use std::sync::OnceLock;

/// Keeps the exporter pipeline alive so spans can be flushed at exit.
static OTEL_PROVIDER: OnceLock<SdkTracerProvider> = OnceLock::new();

/// Install the global tracing subscriber.
///
/// `default_filter` is the baseline directive set chosen by the CLI's
/// verbosity flags; an explicit `RUST_LOG` wins over it. With `enable_otel`
/// the span pipeline is registered globally and remembered for
/// [`shutdown_tracing`].
///
/// # Errors
///
/// Fails when a global subscriber is already installed.
pub fn init_tracing(
    default_filter: &str,
    enable_otel: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    let otel_layer = if enable_otel {
        let provider = SdkTracerProvider::builder()
            .with_simple_exporter(opentelemetry_stdout::SpanExporter::default())
            .build();
        let tracer = provider.tracer("deskpilot");
        let _ = OTEL_PROVIDER.set(provider.clone());
        opentelemetry::global::set_tracer_provider(provider);
        Some(tracing_opentelemetry::layer().with_tracer(tracer))
    } else {
        None
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(true)
                .with_span_events(FmtSpan::CLOSE),
        )
        .with(otel_layer)
        .try_init()?;

    Ok(())
}

/// Flush buffered spans and tear down the OTel pipeline.
///
/// No-op unless [`init_tracing`] was called with `enable_otel`.
pub fn shutdown_tracing() {
    if let Some(provider) = OTEL_PROVIDER.get()
        && let Err(err) = provider.shutdown()
    {
        eprintln!("otel shutdown incomplete: {err}");
    }
}
