//! Tracing subscriber initialization with structured logging and optional
//! OpenTelemetry trace export.
//!
//! # Usage
//!
//! ```no_run
//! use reconcile_observe::{LogFormat, TracingOptions, init_tracing};
//!
//! init_tracing(&TracingOptions {
//!     format: LogFormat::Json,
//!     default_filter: "info".to_string(),
//!     enable_otel: false,
//! })
//! .unwrap();
//! ```

use std::sync::OnceLock;

use opentelemetry::trace::TracerProvider as _;
use opentelemetry_sdk::trace::SdkTracerProvider;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::layer::{Layered, SubscriberExt};
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, Registry};

/// Stores the OTel tracer provider so it can be shut down cleanly on exit.
static TRACER_PROVIDER: OnceLock<SdkTracerProvider> = OnceLock::new();

/// How log lines are rendered on stderr.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    /// Human-readable lines.
    #[default]
    Pretty,
    /// One JSON object per event, with span close timing.
    Json,
}

#[derive(Debug, Clone)]
pub struct TracingOptions {
    pub format: LogFormat,
    /// Filter used when `RUST_LOG` is unset, e.g. `"warn"` or `"reconcile_core=debug"`.
    pub default_filter: String,
    /// Bridge spans to OpenTelemetry with a stdout exporter.
    pub enable_otel: bool,
}

impl Default for TracingOptions {
    fn default() -> Self {
        Self {
            format: LogFormat::Pretty,
            default_filter: "warn".to_string(),
            enable_otel: false,
        }
    }
}

type FmtLayer = Box<dyn Layer<Layered<EnvFilter, Registry>> + Send + Sync>;

fn fmt_layer(format: LogFormat) -> FmtLayer {
    match format {
        LogFormat::Pretty => tracing_subscriber::fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(true)
            .boxed(),
        LogFormat::Json => tracing_subscriber::fmt::layer()
            .json()
            .with_writer(std::io::stderr)
            .with_span_events(FmtSpan::CLOSE)
            .boxed(),
    }
}

/// Initialize the global tracing subscriber.
///
/// - Installs a `fmt` layer writing to stderr, so command output on stdout
///   stays machine-readable.
/// - `RUST_LOG` wins over `default_filter` when set.
/// - With `enable_otel`, additionally bridges spans to OpenTelemetry using a
///   stdout exporter.
///
/// # Errors
///
/// Returns an error if the filter is invalid or a global subscriber has
/// already been set.
pub fn init_tracing(options: &TracingOptions) -> Result<(), Box<dyn std::error::Error>> {
    let env_filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(&options.default_filter)?,
    };

    let otel_layer = if options.enable_otel {
        let provider = SdkTracerProvider::builder()
            .with_simple_exporter(opentelemetry_stdout::SpanExporter::default())
            .build();
        let tracer = provider.tracer("reconcile");

        let _ = TRACER_PROVIDER.set(provider.clone());
        opentelemetry::global::set_tracer_provider(provider);
        Some(tracing_opentelemetry::layer().with_tracer(tracer))
    } else {
        None
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer(options.format))
        .with(otel_layer)
        .try_init()?;

    Ok(())
}

/// Flush pending traces and shut down the OpenTelemetry tracer provider.
///
/// Safe to call even when OTel was not enabled.
pub fn shutdown_tracing() {
    if let Some(provider) = TRACER_PROVIDER.get() {
        if let Err(e) = provider.shutdown() {
            eprintln!("Warning: OTel tracer provider shutdown error: {e}");
        }
    }
}
