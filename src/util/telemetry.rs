use std::time::Duration;

use opentelemetry::KeyValue;
use opentelemetry::trace::TracerProvider;
use opentelemetry_appender_tracing::layer::OpenTelemetryTracingBridge;
use opentelemetry_otlp::{self, Protocol, WithExportConfig};
use opentelemetry_sdk::Resource;
use opentelemetry_sdk::logs::SdkLoggerProvider;
use opentelemetry_sdk::metrics::SdkMeterProvider;
use opentelemetry_sdk::trace::SdkTracerProvider;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

pub type Result<T> = core::result::Result<T, Box<dyn std::error::Error>>;

const EXPORT_TIMEOUT: Duration = Duration::from_secs(5);

/// Process-wide tracing setup, built once by `main`.
///
/// Console output is always on; OTLP export of traces, logs and metrics is added when a
/// collector endpoint is configured.
#[derive(Debug)]
pub struct Telemetry {
    filter: String,
    exporters: Option<Exporters>,
}

#[derive(Debug)]
struct Exporters {
    tracer_name: String,
    logger_provider: SdkLoggerProvider,
    tracer_provider: SdkTracerProvider,
    meter_provider: SdkMeterProvider,
}

impl Telemetry {
    pub fn new(filter: &str, service_name: &str, collector_url: Option<&str>) -> Result<Self> {
        let exporters = match collector_url {
            Some(url) => {
                let resource = base_attrs(service_name, env!("CARGO_PKG_VERSION"));
                Some(Exporters {
                    tracer_name: service_name.to_string(),
                    logger_provider: build_logger_provider(url, resource.clone())?,
                    tracer_provider: build_tracer_provider(url, resource.clone())?,
                    meter_provider: build_meter_provider(url, resource)?,
                })
            }
            None => None,
        };

        Ok(Self {
            filter: filter.to_string(),
            exporters,
        })
    }

    /// Installs the global subscriber. Must only be called once per process.
    pub fn register(self) -> Self {
        let (trace_layer, log_layer, meter_layer) = match &self.exporters {
            Some(exp) => {
                let tracer = exp.tracer_provider.tracer(exp.tracer_name.clone());
                (
                    Some(tracing_opentelemetry::layer().with_tracer(tracer)),
                    Some(OpenTelemetryTracingBridge::new(&exp.logger_provider)),
                    Some(tracing_opentelemetry::MetricsLayer::new(
                        exp.meter_provider.clone(),
                    )),
                )
            }
            None => (None, None, None),
        };

        tracing_subscriber::registry()
            .with(trace_layer)
            .with(log_layer)
            .with(meter_layer)
            .with(EnvFilter::new(&self.filter))
            .with(
                tracing_subscriber::fmt::layer()
                    .with_target(true)
                    .with_thread_ids(true)
                    .with_line_number(true),
            )
            .init();

        if self.exporters.is_none() {
            tracing::debug!("no OTLP collector configured, logging to console only");
        }

        self
    }

    pub fn shutdown(self) {
        let Some(exp) = self.exporters else {
            return;
        };

        if let Err(e) = exp.meter_provider.shutdown() {
            eprintln!("error during metering shutdown: {e:?}");
        }

        if let Err(e) = exp.logger_provider.shutdown() {
            eprintln!("error during logging shutdown: {e:?}");
        }

        if let Err(e) = exp.tracer_provider.shutdown() {
            eprintln!("error during tracing shutdown: {e:?}");
        }
    }
}

fn build_logger_provider(collector_url: &str, base_resource: Resource) -> Result<SdkLoggerProvider> {
    let exporter = opentelemetry_otlp::LogExporter::builder()
        .with_tonic()
        .with_protocol(Protocol::Grpc)
        .with_endpoint(collector_url)
        .with_timeout(EXPORT_TIMEOUT)
        .build()?;

    Ok(SdkLoggerProvider::builder()
        .with_batch_exporter(exporter)
        .with_resource(base_resource)
        .build())
}

fn build_tracer_provider(collector_url: &str, base_resource: Resource) -> Result<SdkTracerProvider> {
    let exporter = opentelemetry_otlp::SpanExporter::builder()
        .with_tonic()
        .with_protocol(Protocol::Grpc)
        .with_endpoint(collector_url)
        .with_timeout(EXPORT_TIMEOUT)
        .build()?;

    Ok(SdkTracerProvider::builder()
        .with_batch_exporter(exporter)
        .with_resource(base_resource)
        .build())
}

fn build_meter_provider(collector_url: &str, base_resource: Resource) -> Result<SdkMeterProvider> {
    let exporter = opentelemetry_otlp::MetricExporter::builder()
        .with_tonic()
        .with_protocol(Protocol::Grpc)
        .with_endpoint(collector_url)
        .with_timeout(EXPORT_TIMEOUT)
        .build()?;

    Ok(SdkMeterProvider::builder()
        .with_periodic_exporter(exporter)
        .with_resource(base_resource)
        .build())
}

fn base_attrs(name: &str, version: &'static str) -> Resource {
    Resource::builder()
        .with_service_name(name.to_string())
        .with_attributes([KeyValue::new("service.version", version)])
        .build()
}
