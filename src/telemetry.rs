use std::path::Path;
use std::sync::OnceLock;

use anyhow::Context;
use opentelemetry::trace::TracerProvider;
use opentelemetry_otlp::{MetricExporter, SpanExporter};
use opentelemetry_sdk::{Resource, metrics::SdkMeterProvider, trace::SdkTracerProvider};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_opentelemetry::{MetricsLayer, OpenTelemetryLayer};
use tracing_subscriber::Layer;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt as _, util::SubscriberInitExt as _};

const SERVICE_NAME: &str = "paperscout";

fn get_resource() -> Resource {
    static RESOURCE: OnceLock<Resource> = OnceLock::new();
    RESOURCE
        .get_or_init(|| Resource::builder().with_service_name(SERVICE_NAME).build())
        .clone()
}

fn init_traces() -> anyhow::Result<SdkTracerProvider> {
    let exporter = SpanExporter::builder()
        .with_http()
        .build()
        .context("Failed to create trace exporter")?;

    Ok(SdkTracerProvider::builder()
        .with_batch_exporter(exporter)
        .with_resource(get_resource())
        .build())
}

fn init_metrics() -> anyhow::Result<SdkMeterProvider> {
    let exporter = MetricExporter::builder()
        .with_http()
        .build()
        .context("Failed to create metric exporter")?;

    Ok(SdkMeterProvider::builder()
        .with_periodic_exporter(exporter)
        .with_resource(get_resource())
        .build())
}

/// `RUST_LOG` wins over the configured default level
fn env_filter(default_level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level))
}

/// Install the global subscriber: stderr console output, an optional log
/// file, and optional OTLP export. Keep the guard alive until exit.
pub fn init_tracing_subscriber(
    default_level: &str,
    log_file: Option<&Path>,
    otlp: bool,
) -> anyhow::Result<TelemetryGuard> {
    let console_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_filter(env_filter(default_level));

    let mut file_guard = None;
    let file_layer = match log_file {
        Some(path) => {
            let directory = path
                .parent()
                .filter(|p| !p.as_os_str().is_empty())
                .unwrap_or(Path::new("."));
            let file_name = path
                .file_name()
                .context("Log file path has no file name")?;
            std::fs::create_dir_all(directory)
                .with_context(|| format!("Failed to create log directory {}", directory.display()))?;

            let appender = tracing_appender::rolling::never(directory, file_name);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            file_guard = Some(guard);
            Some(
                tracing_subscriber::fmt::layer()
                    .with_writer(writer)
                    .with_ansi(false)
                    .with_filter(env_filter(default_level)),
            )
        }
        None => None,
    };

    let mut otel = None;
    let (trace_layer, metrics_layer) = if otlp {
        let tracer_provider = init_traces()?;
        let meter_provider = init_metrics()?;
        let tracer = tracer_provider.tracer(SERVICE_NAME);
        let layers = (
            Some(OpenTelemetryLayer::new(tracer)),
            Some(MetricsLayer::new(meter_provider.clone())),
        );
        otel = Some(OtelGuard {
            tracer_provider,
            meter_provider,
        });
        layers
    } else {
        (None, None)
    };

    tracing_subscriber::registry()
        .with(console_layer)
        .with(file_layer)
        .with(metrics_layer)
        .with(trace_layer)
        .init();

    Ok(TelemetryGuard {
        _file: file_guard,
        _otel: otel,
    })
}

/// Flushes the log file and OpenTelemetry exporters when dropped
pub struct TelemetryGuard {
    _file: Option<WorkerGuard>,
    _otel: Option<OtelGuard>,
}

pub struct OtelGuard {
    tracer_provider: SdkTracerProvider,
    meter_provider: SdkMeterProvider,
}

impl Drop for OtelGuard {
    fn drop(&mut self) {
        if let Err(err) = self.tracer_provider.shutdown() {
            eprintln!("{err:?}");
        }
        if let Err(err) = self.meter_provider.shutdown() {
            eprintln!("{err:?}");
        }
    }
}
