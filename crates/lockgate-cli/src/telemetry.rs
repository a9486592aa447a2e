//! Logging and OpenTelemetry pipeline initialisation.
//!
//! Call [`init_tracing`] once at process startup.
//!
//! # Environment variables
//!
//! | Variable | Effect |
//! |---|---|
//! | `OTEL_EXPORTER_OTLP_ENDPOINT` | OTLP collector base URL (e.g. `http://localhost:4318`). When set the OTLP HTTP exporter is activated. |
//! | `RUST_LOG` | Log filter (defaults to the configured `log_level`). |
//! | `LOCKGATE_LOG_FORMAT=json` | Emit newline-delimited JSON logs. |

use std::fs::{self, File, OpenOptions};
use std::path::Path;
use std::sync::Mutex;

use lockgate_types::GatewayError;
use opentelemetry::trace::TracerProvider as _;
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::{Resource, trace::SdkTracerProvider};
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::Config;

/// Initialise the global `tracing` subscriber.
///
/// Logs go to stdout, or to `cfg.log_file` when one is configured (the
/// parent directory is created on demand).  When
/// `OTEL_EXPORTER_OTLP_ENDPOINT` is set, spans are also exported over
/// OTLP/HTTP.
///
/// The returned [`TracerProviderGuard`] **must** be held for the lifetime of
/// the process; dropping it flushes pending spans.
pub fn init_tracing(service_name: &str, cfg: &Config) -> Result<TracerProviderGuard, GatewayError> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cfg.log_level));
    let use_json = std::env::var("LOCKGATE_LOG_FORMAT").as_deref() == Ok("json");

    let (writer, ansi) = match &cfg.log_file {
        Some(path) => (BoxMakeWriter::new(Mutex::new(open_log_file(path)?)), false),
        None => (BoxMakeWriter::new(std::io::stdout), true),
    };

    let provider = build_provider(service_name);
    let otel_layer = provider
        .as_ref()
        .map(|p| tracing_opentelemetry::layer().with_tracer(p.tracer("lockgate")));

    let registry = tracing_subscriber::registry().with(env_filter).with(otel_layer);
    if use_json {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(writer).with_ansi(ansi))
            .init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().compact().with_writer(writer).with_ansi(ansi))
            .init();
    }

    Ok(TracerProviderGuard(provider))
}

/// Shuts down the OTel [`SdkTracerProvider`] on drop, flushing pending spans.
pub struct TracerProviderGuard(Option<SdkTracerProvider>);

impl Drop for TracerProviderGuard {
    fn drop(&mut self) {
        if let Some(provider) = self.0.take()
            && let Err(e) = provider.shutdown()
        {
            eprintln!("[lockgate] OpenTelemetry provider shutdown error: {e}");
        }
    }
}

/// Open `path` for appending, creating missing parent directories.
fn open_log_file(path: &Path) -> Result<File, GatewayError> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent)?;
    }
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|e| GatewayError::Config(format!("cannot open log file {}: {e}", path.display())))
}

/// Build an [`SdkTracerProvider`] when `OTEL_EXPORTER_OTLP_ENDPOINT` is set.
///
/// Returns `None` when the env-var is absent or the exporter cannot be
/// initialised; the caller then logs without OTel export.
fn build_provider(service_name: &str) -> Option<SdkTracerProvider> {
    let endpoint = std::env::var("OTEL_EXPORTER_OTLP_ENDPOINT").ok()?;

    let exporter = opentelemetry_otlp::SpanExporter::builder()
        .with_http()
        .with_endpoint(endpoint)
        .build()
        .map_err(|e| eprintln!("[lockgate] OTLP exporter init failed: {e}"))
        .ok()?;

    let resource = Resource::builder()
        .with_service_name(service_name.to_string())
        .build();

    Some(
        SdkTracerProvider::builder()
            .with_resource(resource)
            // Synchronous export: no batch worker task to keep alive.
            .with_simple_exporter(exporter)
            .build(),
    )
}
