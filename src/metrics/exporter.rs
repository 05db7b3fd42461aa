//! One-time construction of the OTLP metrics pipeline
//!
//! Setup runs in fixed steps (exporter, resource, periodic reader, provider,
//! instrument). Any failing step aborts setup and is reported once.

use crate::config::{ExportConfig, MetricsConfig, Protocol, Temporality};
use crate::error::SetupError;
use crate::metrics::collector::FlowCollector;
use crate::metrics::counter::{
    ConnectionBytesCounter, CONNECTIONS_OBSERVED, CONNECTIONS_OBSERVED_DESCRIPTION,
    CONNECTIONS_OBSERVED_UNIT,
};
use beyla_network_common::FlowRecord;
use opentelemetry::metrics::{Meter, MeterProvider as _};
use opentelemetry::KeyValue;
use opentelemetry_otlp::{MetricExporter, WithExportConfig, WithHttpConfig, WithTonicConfig};
use opentelemetry_sdk::metrics::{PeriodicReader, SdkMeterProvider};
use opentelemetry_sdk::Resource;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tonic::metadata::{AsciiMetadataKey, AsciiMetadataValue, MetadataMap};
use tracing::{error, info, warn};

pub const SERVICE_NAME: &str = "beyla-network";
pub const SERVICE_VERSION: &str = "0.1.0";
pub const SCHEMA_URL: &str = "https://opentelemetry.io/schemas/1.21.0";
pub const METER_NAME: &str = "ebpf_events";

const SERVICE_VERSION_KEY: &str = "service.version";
const HTTP_METRICS_PATH: &str = "/v1/metrics";

/// Process-lifetime metrics state: the meter provider and the instruments
/// registered on it.
///
/// Passed explicitly to whoever emits metrics; nothing is installed globally.
pub struct MetricsContext {
    provider: SdkMeterProvider,
    meter: Meter,
    instruments: Mutex<HashSet<String>>,
}

impl MetricsContext {
    /// Wraps an already built provider
    pub fn new(provider: SdkMeterProvider) -> Self {
        let meter = provider.meter(METER_NAME);
        Self {
            provider,
            meter,
            instruments: Mutex::new(HashSet::new()),
        }
    }

    /// Builds exporter, resource, periodic reader and provider from config
    pub fn from_config(config: &MetricsConfig) -> Result<Self, SetupError> {
        let exporter = instantiate_metrics_exporter(config)
            .inspect_err(|e| error!(step = "exporter", error = %e, "metrics setup failed"))?;

        let resource = new_resource()
            .inspect_err(|e| error!(step = "resource", error = %e, "metrics setup failed"))?;

        let provider = new_meter_provider(resource, exporter, config)
            .inspect_err(|e| error!(step = "provider", error = %e, "metrics setup failed"))?;

        Ok(Self::new(provider))
    }

    /// Registers `ebpf.connections.observed`. Fails if it is already registered
    /// in this context.
    pub fn connection_bytes_counter(&self) -> Result<ConnectionBytesCounter, SetupError> {
        self.register(CONNECTIONS_OBSERVED)?;

        let counter = self
            .meter
            .u64_counter(CONNECTIONS_OBSERVED)
            .with_description(CONNECTIONS_OBSERVED_DESCRIPTION)
            .with_unit(CONNECTIONS_OBSERVED_UNIT)
            .build();

        Ok(ConnectionBytesCounter::new(counter))
    }

    fn register(&self, name: &str) -> Result<(), SetupError> {
        let mut instruments = self
            .instruments
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        if !instruments.insert(name.to_string()) {
            return Err(SetupError::DuplicateInstrument {
                name: name.to_string(),
            });
        }
        Ok(())
    }

    pub fn is_registered(&self, name: &str) -> bool {
        self.instruments
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .contains(name)
    }

    pub fn meter(&self) -> &Meter {
        &self.meter
    }

    /// Flushes once more and stops the periodic reader
    pub fn shutdown(&self) {
        match self.provider.shutdown() {
            Ok(()) => info!("metrics provider shut down"),
            Err(e) => warn!(error = %e, "failed to shut down metrics provider"),
        }
    }
}

/// Instantiates the OTLP metrics exporter for the configured transport
pub fn instantiate_metrics_exporter(config: &MetricsConfig) -> Result<MetricExporter, SetupError> {
    let endpoint = config
        .endpoint
        .as_deref()
        .map(str::trim)
        .filter(|e| !e.is_empty())
        .ok_or(SetupError::MissingEndpoint)?;

    let temporality = match config.temporality {
        Temporality::Cumulative => opentelemetry_sdk::metrics::Temporality::Cumulative,
        Temporality::Delta => opentelemetry_sdk::metrics::Temporality::Delta,
    };

    info!(
        endpoint,
        protocol = %config.protocol,
        interval = ?config.interval,
        "instantiating OTLP metrics exporter"
    );

    let exporter = match config.protocol {
        Protocol::Grpc => MetricExporter::builder()
            .with_temporality(temporality)
            .with_tonic()
            .with_endpoint(endpoint)
            .with_timeout(config.timeout)
            .with_metadata(grpc_metadata(&config.headers)?)
            .build(),
        Protocol::HttpProtobuf => MetricExporter::builder()
            .with_temporality(temporality)
            .with_http()
            .with_protocol(opentelemetry_otlp::Protocol::HttpBinary)
            .with_endpoint(http_metrics_endpoint(endpoint))
            .with_timeout(config.timeout)
            .with_headers(config.headers.clone())
            .build(),
    };

    exporter.map_err(|e| SetupError::Exporter(e.to_string()))
}

/// Appends the OTLP metrics path unless the endpoint already carries it
pub fn http_metrics_endpoint(endpoint: &str) -> String {
    let base = endpoint.trim_end_matches('/');
    if base.ends_with(HTTP_METRICS_PATH) {
        base.to_string()
    } else {
        format!("{}{}", base, HTTP_METRICS_PATH)
    }
}

fn grpc_metadata(headers: &HashMap<String, String>) -> Result<MetadataMap, SetupError> {
    let mut metadata = MetadataMap::with_capacity(headers.len());
    for (key, value) in headers {
        let key = AsciiMetadataKey::from_bytes(key.to_ascii_lowercase().as_bytes())
            .map_err(|e| SetupError::Exporter(format!("invalid header name {:?}: {}", key, e)))?;
        let value = AsciiMetadataValue::try_from(value.as_str())
            .map_err(|e| SetupError::Exporter(format!("invalid header value for {}: {}", key.as_str(), e)))?;
        metadata.insert(key, value);
    }
    Ok(metadata)
}

/// SDK default resource (host, SDK and environment detectors) merged with
/// this service's identity
pub fn new_resource() -> Result<Resource, SetupError> {
    let resource = Resource::builder()
        .with_service_name(SERVICE_NAME)
        .with_schema_url(
            [KeyValue::new(SERVICE_VERSION_KEY, SERVICE_VERSION)],
            SCHEMA_URL,
        )
        .build();
    Ok(resource)
}

fn new_meter_provider(
    resource: Resource,
    exporter: MetricExporter,
    config: &MetricsConfig,
) -> Result<SdkMeterProvider, SetupError> {
    if config.interval.is_zero() {
        return Err(SetupError::Provider("metrics interval must be positive".into()));
    }

    let reader = PeriodicReader::builder(exporter)
        .with_interval(config.interval)
        .build();

    Ok(SdkMeterProvider::builder()
        .with_resource(resource)
        .with_reader(reader)
        .build())
}

/// Terminal pipeline stage: the flow collector bound to a live metrics context
pub struct FlowMetricsExporter {
    context: Arc<MetricsContext>,
    collector: FlowCollector<ConnectionBytesCounter>,
}

impl FlowMetricsExporter {
    pub fn new(context: Arc<MetricsContext>, collector: FlowCollector<ConnectionBytesCounter>) -> Self {
        Self { context, collector }
    }

    /// Consumes batches until the channel closes, then flushes and shuts the
    /// provider down.
    pub async fn run(self, rx: mpsc::Receiver<Vec<FlowRecord>>) {
        self.collector.run(rx).await;

        // Provider shutdown blocks until the final export completes.
        let context = Arc::clone(&self.context);
        if let Err(e) = tokio::task::spawn_blocking(move || context.shutdown()).await {
            warn!(error = %e, "metrics shutdown task failed");
        }
    }
}

/// Builds the flow metrics pipeline from configuration
pub fn metrics_exporter_provider(config: &ExportConfig) -> Result<FlowMetricsExporter, SetupError> {
    let context = Arc::new(MetricsContext::from_config(&config.metrics)?);

    let counter = context
        .connection_bytes_counter()
        .inspect_err(|e| error!(step = "instrument", error = %e, "metrics setup failed"))?;

    info!(
        metric = CONNECTIONS_OBSERVED,
        service = SERVICE_NAME,
        "flow metrics exporter ready"
    );

    Ok(FlowMetricsExporter::new(
        context,
        FlowCollector::new(counter, config.environment.clone()),
    ))
}
