use axum::{body::Body, http::Request, response::Response};
use opentelemetry::{
    global,
    trace::{SpanKind, TraceContextExt, Tracer},
    Context, KeyValue,
};
use opentelemetry_appender_tracing::layer::OpenTelemetryTracingBridge;
use opentelemetry_otlp::{WithExportConfig, WithTonicConfig};
use opentelemetry_sdk::logs::SdkLoggerProvider;
use std::{
    future::Future,
    pin::Pin,
    sync::OnceLock,
    task::{Context as TaskContext, Poll},
};
use tower::{Layer, Service};
use tracing_subscriber::{
    layer::SubscriberExt, registry::LookupSpan, util::SubscriberInitExt, EnvFilter,
    Layer as SubscriberLayer,
};
use uuid::Uuid;

use crate::actor::ACTOR_HEADER;

const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Keep the LoggerProvider alive for the process lifetime.
static LOGGER_PROVIDER: OnceLock<SdkLoggerProvider> = OnceLock::new();

/// Events from the exporter's own transport are never exported, or every
/// export would log another record to export.
const EXPORT_FILTER: &str = "info,hyper=off,h2=off,tonic=off,tower=off,opentelemetry=off";

/// Install the global `tracing` subscriber: `RUST_LOG` filter (default
/// `info`), console output, and OTLP log export when a provider is given.
pub fn init_tracing(logger_provider: Option<&SdkLoggerProvider>) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .with(logger_provider.map(|provider| otel_log_layer(provider)))
        .init();
}

/// A subscriber layer that forwards `tracing` events to the OTLP logger.
pub fn otel_log_layer<S>(provider: &SdkLoggerProvider) -> impl SubscriberLayer<S>
where
    S: tracing::Subscriber + for<'a> LookupSpan<'a>,
{
    OpenTelemetryTracingBridge::new(provider).with_filter(EnvFilter::new(EXPORT_FILTER))
}

fn tls_config() -> opentelemetry_otlp::tonic_types::transport::ClientTlsConfig {
    opentelemetry_otlp::tonic_types::transport::ClientTlsConfig::new().with_native_roots()
}

/// gRPC metadata carrying the SigNoz Cloud ingestion key, when one is set.
fn ingestion_metadata() -> Option<opentelemetry_otlp::tonic_types::metadata::MetadataMap> {
    let key = std::env::var("SIGNOZ_INGESTION_KEY").ok().filter(|k| !k.is_empty())?;
    let value = match key.parse() {
        Ok(value) => value,
        Err(_) => {
            eprintln!("Invalid SIGNOZ_INGESTION_KEY value, sending without it");
            return None;
        }
    };
    let mut metadata = opentelemetry_otlp::tonic_types::metadata::MetadataMap::new();
    metadata.insert("signoz-ingestion-key", value);
    Some(metadata)
}

/// Set up the OpenTelemetry trace and log exporters. The tracer provider is
/// registered globally; the returned logger provider feeds `init_tracing`.
///
/// Reads config from environment:
///   - `OTEL_EXPORTER_OTLP_ENDPOINT`: collector gRPC address
///       Local: `http://localhost:4317`
///       SigNoz Cloud: `https://ingest.{region}.signoz.cloud:443`
///   - `OTEL_SERVICE_NAME`: service name tag (default: `matterflow`)
///   - `SIGNOZ_INGESTION_KEY`: SigNoz Cloud access token (optional for local)
///   - `DEPLOY_ENV`: deployment environment tag (default: `development`)
///
/// Must be called from within a Tokio runtime.
pub fn init_telemetry() -> Option<&'static SdkLoggerProvider> {
    let _ = dotenvy::dotenv();

    let endpoint = match std::env::var("OTEL_EXPORTER_OTLP_ENDPOINT") {
        Ok(ep) => ep,
        Err(_) => {
            eprintln!("OTEL_EXPORTER_OTLP_ENDPOINT not set, skipping OTLP telemetry");
            return None;
        }
    };
    let secure = endpoint.starts_with("https://");

    let service_name =
        std::env::var("OTEL_SERVICE_NAME").unwrap_or_else(|_| "matterflow".to_string());
    let environment = std::env::var("DEPLOY_ENV").unwrap_or_else(|_| "development".to_string());

    let mut builder = opentelemetry_otlp::SpanExporter::builder()
        .with_tonic()
        .with_endpoint(&endpoint);
    if secure {
        builder = builder.with_tls_config(tls_config());
    }
    if let Some(metadata) = ingestion_metadata() {
        builder = builder.with_metadata(metadata);
    }
    let exporter = match builder.build() {
        Ok(exporter) => exporter,
        Err(e) => {
            eprintln!("Failed to create OTLP span exporter: {e}");
            return None;
        }
    };

    let resource = opentelemetry_sdk::Resource::builder()
        .with_service_name(service_name)
        .with_attribute(KeyValue::new("service.version", APP_VERSION))
        .with_attribute(KeyValue::new("deployment.environment", environment))
        .build();

    let provider = opentelemetry_sdk::trace::SdkTracerProvider::builder()
        .with_batch_exporter(exporter)
        .with_resource(resource.clone())
        .build();

    global::set_tracer_provider(provider);

    // -- Log exporter, fed by the `tracing` subscriber --
    let mut log_builder = opentelemetry_otlp::LogExporter::builder()
        .with_tonic()
        .with_endpoint(&endpoint);
    if secure {
        log_builder = log_builder.with_tls_config(tls_config());
    }
    if let Some(metadata) = ingestion_metadata() {
        log_builder = log_builder.with_metadata(metadata);
    }
    let log_exporter = match log_builder.build() {
        Ok(exporter) => exporter,
        Err(e) => {
            eprintln!("Failed to create OTLP log exporter: {e}; traces only");
            return None;
        }
    };

    let logger_provider = LOGGER_PROVIDER.get_or_init(|| {
        SdkLoggerProvider::builder()
            .with_batch_exporter(log_exporter)
            .with_resource(resource)
            .build()
    });

    let mode = if ingestion_metadata().is_some() { "cloud" } else { "local" };
    eprintln!("Telemetry initialized v{APP_VERSION}, traces + logs exporting to {endpoint} ({mode})");
    Some(logger_provider)
}

/// Collapse id-shaped path segments so spans group by route, not by record.
fn route_template(path: &str) -> String {
    path.split('/')
        .map(|segment| {
            if Uuid::parse_str(segment).is_ok()
                || (!segment.is_empty() && segment.chars().all(|c| c.is_ascii_digit()))
            {
                "{id}"
            } else {
                segment
            }
        })
        .collect::<Vec<_>>()
        .join("/")
}

/// Tower layer that creates an OpenTelemetry span for each HTTP request.
///
/// Captures: method, route, request ID, acting user and response status.
#[derive(Clone)]
pub struct OtelTraceLayer;

impl<S> Layer<S> for OtelTraceLayer {
    type Service = OtelTraceService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        OtelTraceService { inner }
    }
}

#[derive(Clone)]
pub struct OtelTraceService<S> {
    inner: S,
}

impl<S> Service<Request<Body>> for OtelTraceService<S>
where
    S: Service<Request<Body>, Response = Response> + Send + Clone + 'static,
    S::Future: Send + 'static,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut TaskContext<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Request<Body>) -> Self::Future {
        let tracer = global::tracer("matterflow");
        let method = req.method().to_string();
        let path = req.uri().path().to_string();

        let header = |name: &str| {
            req.headers()
                .get(name)
                .and_then(|v| v.to_str().ok())
                .unwrap_or("")
                .to_string()
        };
        let request_id = header("x-request-id");
        let actor = header(ACTOR_HEADER);

        let mut attributes = vec![
            KeyValue::new("http.method", method.clone()),
            KeyValue::new("http.target", path.clone()),
            KeyValue::new("http.request_id", request_id),
        ];
        if actor.is_empty() {
            attributes.push(KeyValue::new("actor.status", "anonymous"));
        } else {
            attributes.push(KeyValue::new("actor.id", actor));
        }

        let span = tracer
            .span_builder(format!("{} {}", &method, route_template(&path)))
            .with_kind(SpanKind::Server)
            .with_attributes(attributes)
            .start(&tracer);

        let cx = Context::current_with_span(span);
        let mut inner = self.inner.clone();

        let guard = cx.clone().attach();
        let future = inner.call(req);
        drop(guard);

        Box::pin(async move {
            let response = future.await?;

            let span = cx.span();
            let status = response.status();
            span.set_attribute(KeyValue::new("http.status_code", status.as_u16() as i64));

            if status.is_server_error() {
                span.set_status(opentelemetry::trace::Status::error(status.to_string()));
            } else if status.is_client_error() {
                span.set_attribute(KeyValue::new("error.type", "client_error"));
            }

            Ok(response)
        })
    }
}
