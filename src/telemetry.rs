//! Telemetry bootstrap for services using these interceptors.
//!
//! [`init`] wires the OTLP exporters, registers the process-wide tracer
//! and meter providers and the W3C trace-context propagator (so chained
//! middleware agrees on the wire format), and installs the `tracing`
//! subscriber. Endpoints are optional: a service with no collector still
//! gets console logging.

use opentelemetry::global;
use opentelemetry::trace::TracerProvider as _;
use opentelemetry_appender_tracing::layer::OpenTelemetryTracingBridge;
use opentelemetry_otlp::{
    ExporterBuildError, LogExporter, MetricExporter, SpanExporter, WithExportConfig,
};
use opentelemetry_sdk::logs::SdkLoggerProvider;
use opentelemetry_sdk::metrics::{PeriodicReader, SdkMeterProvider};
use opentelemetry_sdk::propagation::TraceContextPropagator;
use opentelemetry_sdk::trace::SdkTracerProvider;
use opentelemetry_sdk::Resource;
use serde::{Deserialize, Serialize};
use snafu::{ResultExt as _, Snafu};
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

/// Telemetry initialization errors.
#[derive(Debug, Snafu)]
pub enum Error {
    /// The OTLP log exporter could not be built.
    #[snafu(display("Could not initialize logging: {source}"))]
    InitLog {
        /// The underlying exporter build error.
        source: ExporterBuildError,
    },

    /// The OTLP metric exporter could not be built.
    #[snafu(display("Could not initialize metrics: {source}"))]
    InitMetric {
        /// The underlying exporter build error.
        source: ExporterBuildError,
    },

    /// The OTLP span exporter could not be built.
    #[snafu(display("Could not initialize tracing: {source}"))]
    InitTrace {
        /// The underlying exporter build error.
        source: ExporterBuildError,
    },
}

/// Settings for the OTLP metric pipeline.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct MetricSettings {
    /// Collector endpoint, e.g. `http://localhost:4317`; `None` disables
    /// metric export.
    pub endpoint: Option<String>,
}

/// Settings for console and exported logs.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct LogSettings {
    /// Filter for the console layer, e.g. `debug,yourcrate=trace`.
    pub console_level: String,
    /// Filter for the exported-log layer, e.g. `warn,yourcrate=debug`.
    pub otel_level: String,
    /// Collector endpoint, e.g. `http://localhost:4317`; `None` disables
    /// log export.
    pub endpoint: Option<String>,
}

/// Settings for the OTLP span pipeline.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct TraceSettings {
    /// Collector endpoint, e.g. `http://localhost:4317`; `None` disables
    /// span export.
    pub endpoint: Option<String>,
}

/// Telemetry settings, one section per signal.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct TelemetrySettings {
    /// Span pipeline settings.
    pub trace: TraceSettings,
    /// Log pipeline settings.
    pub log: LogSettings,
    /// Metric pipeline settings.
    pub metric: MetricSettings,
}

/// Handle keeping the telemetry pipelines alive.
///
/// Dropping it shuts the providers down, flushing whatever they buffered.
pub struct Telemetry {
    meter_provider: Option<SdkMeterProvider>,
    tracer_provider: Option<SdkTracerProvider>,
    logger_provider: SdkLoggerProvider,
}

impl Drop for Telemetry {
    fn drop(&mut self) {
        if let Some(tracer_provider) = self.tracer_provider.take() {
            if let Err(err) = tracer_provider.shutdown() {
                eprintln!("Error shutting down Telemetry tracer provider: {err}");
            }
        }
        if let Some(meter_provider) = self.meter_provider.take() {
            if let Err(err) = meter_provider.shutdown() {
                eprintln!("Error shutting down Telemetry meter provider: {err}");
            }
        }
        if let Err(err) = self.logger_provider.shutdown() {
            eprintln!("Error shutting down Telemetry logger provider: {err}");
        }
    }
}

fn resource(service_name: &str) -> Resource {
    Resource::builder()
        .with_service_name(service_name.to_owned())
        .build()
}

fn init_traces(
    service_name: &str,
    settings: &TraceSettings,
) -> Result<Option<SdkTracerProvider>, ExporterBuildError> {
    match &settings.endpoint {
        Some(endpoint) => {
            let exporter = SpanExporter::builder()
                .with_tonic()
                .with_endpoint(endpoint)
                .build()?;

            Ok(Some(
                SdkTracerProvider::builder()
                    .with_resource(resource(service_name))
                    .with_batch_exporter(exporter)
                    .build(),
            ))
        }
        None => Ok(None),
    }
}

fn init_metrics(
    service_name: &str,
    settings: &MetricSettings,
) -> Result<Option<SdkMeterProvider>, ExporterBuildError> {
    match &settings.endpoint {
        Some(endpoint) => {
            let exporter = MetricExporter::builder()
                .with_tonic()
                .with_endpoint(endpoint)
                .build()?;
            let reader = PeriodicReader::builder(exporter).build();

            Ok(Some(
                SdkMeterProvider::builder()
                    .with_reader(reader)
                    .with_resource(resource(service_name))
                    .build(),
            ))
        }
        None => Ok(None),
    }
}

fn init_logs(
    service_name: &str,
    settings: &LogSettings,
) -> Result<SdkLoggerProvider, ExporterBuildError> {
    let builder = SdkLoggerProvider::builder();

    let builder = match &settings.endpoint {
        Some(endpoint) => {
            let exporter = LogExporter::builder()
                .with_tonic()
                .with_endpoint(endpoint)
                .build()?;

            builder
                .with_resource(resource(service_name))
                .with_batch_exporter(exporter)
        }
        None => builder,
    };

    Ok(builder.build())
}

fn init_subscriber(
    service_name: &str,
    settings: &LogSettings,
    logger_provider: &SdkLoggerProvider,
    tracer_provider: Option<&SdkTracerProvider>,
) {
    let otel_layer = settings.endpoint.as_ref().map(|_| {
        // Events from the export path itself must not be exported again,
        // or the pipeline feeds back into itself.
        let filter_otel = EnvFilter::new(&settings.otel_level)
            .add_directive("hyper=off".parse().unwrap())
            .add_directive("opentelemetry=off".parse().unwrap())
            .add_directive("tonic=off".parse().unwrap())
            .add_directive("h2=off".parse().unwrap())
            .add_directive("reqwest=off".parse().unwrap());
        OpenTelemetryTracingBridge::new(logger_provider).with_filter(filter_otel)
    });

    // With a span pipeline configured, `tracing` spans in the application
    // nest into the same exported traces the interceptors produce.
    let trace_layer = tracer_provider.map(|provider| {
        tracing_opentelemetry::layer().with_tracer(provider.tracer(service_name.to_owned()))
    });

    let filter_fmt = EnvFilter::new(&settings.console_level);
    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_thread_names(true)
        .with_filter(filter_fmt);

    tracing_subscriber::registry()
        .with(otel_layer)
        .with(trace_layer)
        .with(fmt_layer)
        .init();
}

/// Initialize telemetry for a service.
///
/// Builds the configured pipelines, registers the global tracer and meter
/// providers and the W3C trace-context propagator, and installs the
/// `tracing` subscriber. Call once, early in `main`, and keep the returned
/// [`Telemetry`] alive for the life of the process.
pub fn init(service_name: &str, settings: &TelemetrySettings) -> Result<Telemetry, Error> {
    let logger_provider = init_logs(service_name, &settings.log).context(InitLogSnafu)?;

    let tracer_provider = init_traces(service_name, &settings.trace).context(InitTraceSnafu)?;
    if let Some(tracer_provider) = &tracer_provider {
        global::set_tracer_provider(tracer_provider.clone());
    }
    global::set_text_map_propagator(TraceContextPropagator::new());

    let meter_provider = init_metrics(service_name, &settings.metric).context(InitMetricSnafu)?;
    if let Some(meter_provider) = &meter_provider {
        global::set_meter_provider(meter_provider.clone());
    }

    init_subscriber(
        service_name,
        &settings.log,
        &logger_provider,
        tracer_provider.as_ref(),
    );

    Ok(Telemetry {
        meter_provider,
        tracer_provider,
        logger_provider,
    })
}
