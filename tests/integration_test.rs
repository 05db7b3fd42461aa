use beyla_network::config::EnvironmentTags;
use beyla_network::error::{Error, SetupError};
use beyla_network::flows::attributes::{
    CLIENT_KIND, CLIENT_NAME, CLIENT_NAMESPACE, SERVER_KIND, SERVER_NAME, SERVER_NAMESPACE,
    SERVER_PORT,
};
use beyla_network::metrics::counter::{
    CONNECTIONS_OBSERVED, CONNECTIONS_OBSERVED_DESCRIPTION, CONNECTIONS_OBSERVED_UNIT,
};
use beyla_network::metrics::exporter::METER_NAME;
use beyla_network::metrics::{ConnectionCounter, FlowCollector, FlowMetricsExporter, MetricsContext};
use beyla_network::{ExportConfig, FlowRecord};
use opentelemetry::{KeyValue, Value};
use opentelemetry_sdk::metrics::data::Sum;
use opentelemetry_sdk::metrics::{InMemoryMetricExporter, PeriodicReader, SdkMeterProvider};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

#[derive(Default)]
struct RecordingCounter {
    observations: Mutex<Vec<(u64, Vec<KeyValue>)>>,
}

impl RecordingCounter {
    fn observations(&self) -> Vec<(u64, Vec<KeyValue>)> {
        self.observations.lock().unwrap().clone()
    }
}

impl ConnectionCounter for RecordingCounter {
    fn add(&self, bytes: u64, attributes: &[KeyValue]) {
        self.observations
            .lock()
            .unwrap()
            .push((bytes, attributes.to_vec()));
    }
}

fn text(attrs: &[KeyValue], key: &str) -> String {
    attrs
        .iter()
        .find(|kv| kv.key.as_str() == key)
        .map(|kv| kv.value.as_str().into_owned())
        .unwrap_or_default()
}

fn records(json: &str) -> Vec<FlowRecord> {
    serde_json::from_str(json).expect("valid flow batch")
}

#[tokio::test]
async fn test_pipeline_derives_roles_per_direction() {
    let counter = Arc::new(RecordingCounter::default());
    let collector = FlowCollector::new(counter.clone(), EnvironmentTags::default());
    let (tx, rx) = mpsc::channel(2);

    tx.send(records(
        r#"[
            {"FlowDirection": 1, "Bytes": 1024, "SrcPort": 51000, "DstPort": 443,
             "SrcAddr": "10.0.0.5", "DstAddr": "10.0.0.9",
             "SrcK8s_Namespace": "shop", "SrcK8s_Type": "Deployment", "SrcK8s_Name": "frontend",
             "DstK8s_Namespace": "data", "DstK8s_Type": "StatefulSet", "DstK8s_Name": "postgres"},
            {"FlowDirection": 0, "Bytes": 2048, "SrcPort": 5432, "DstPort": 40000,
             "SrcAddr": "10.0.0.9", "DstAddr": "10.0.0.5",
             "SrcK8s_Namespace": "data", "SrcK8s_Type": "StatefulSet", "SrcK8s_Name": "postgres",
             "DstK8s_Namespace": "shop", "DstK8s_Type": "Deployment", "DstK8s_Name": "frontend"}
        ]"#,
    ))
    .await
    .unwrap();
    drop(tx);

    collector.run(rx).await;

    let observations = counter.observations();
    assert_eq!(observations.len(), 2);

    let (bytes, attrs) = &observations[0];
    assert_eq!(*bytes, 1024);
    assert_eq!(text(attrs, CLIENT_NAME), "frontend");
    assert_eq!(text(attrs, CLIENT_NAMESPACE), "shop");
    assert_eq!(text(attrs, CLIENT_KIND), "Deployment");
    assert_eq!(text(attrs, SERVER_NAME), "postgres");
    assert_eq!(text(attrs, SERVER_NAMESPACE), "data");
    assert_eq!(text(attrs, SERVER_KIND), "StatefulSet");

    // Direction 0: the destination is the client.
    let (bytes, attrs) = &observations[1];
    assert_eq!(*bytes, 2048);
    assert_eq!(text(attrs, CLIENT_NAME), "frontend");
    assert_eq!(text(attrs, SERVER_NAME), "postgres");
    assert_eq!(
        attrs.iter().find(|kv| kv.key.as_str() == SERVER_PORT).map(|kv| &kv.value),
        Some(&Value::I64(5432))
    );
}

#[tokio::test]
async fn test_pipeline_external_endpoints_and_bad_bytes() {
    let counter = Arc::new(RecordingCounter::default());
    let collector = FlowCollector::new(counter.clone(), EnvironmentTags::default());
    let (tx, rx) = mpsc::channel(1);

    tx.send(records(
        r#"[{"FlowDirection": 1, "Bytes": "oops", "SrcAddr": "192.168.1.10",
             "DstHost": "example.com", "DstAddr": "93.184.216.34", "SrcPort": 60000, "DstPort": 443}]"#,
    ))
    .await
    .unwrap();
    drop(tx);

    collector.run(rx).await;

    let observations = counter.observations();
    assert_eq!(observations.len(), 1);

    let (bytes, attrs) = &observations[0];
    assert_eq!(*bytes, 0);
    assert_eq!(text(attrs, CLIENT_NAME), "192.168.1.10");
    assert_eq!(text(attrs, CLIENT_KIND), "external");
    assert_eq!(text(attrs, SERVER_NAME), "example.com");
    assert_eq!(text(attrs, SERVER_KIND), "external");
    assert_eq!(text(attrs, CLIENT_NAMESPACE), "");
}

#[tokio::test]
async fn test_exporter_run_flushes_counter_to_sdk() {
    let sink = InMemoryMetricExporter::default();
    let provider = SdkMeterProvider::builder()
        .with_reader(PeriodicReader::builder(sink.clone()).build())
        .build();
    let context = Arc::new(MetricsContext::new(provider));
    let counter = context
        .connection_bytes_counter()
        .expect("instrument registers once");
    let exporter = FlowMetricsExporter::new(
        context.clone(),
        FlowCollector::new(counter, EnvironmentTags::default()),
    );

    let (tx, rx) = mpsc::channel(2);
    tx.send(records(
        r#"[
            {"FlowDirection": 1, "Bytes": 1000, "SrcPort": 51000, "DstPort": 443,
             "SrcK8s_Namespace": "shop", "SrcK8s_Type": "Deployment", "SrcK8s_Name": "frontend",
             "DstK8s_Namespace": "shop", "DstK8s_Type": "Deployment", "DstK8s_Name": "cart"},
            {"FlowDirection": 1, "Bytes": 500, "SrcPort": 51002, "DstPort": 443,
             "SrcK8s_Namespace": "shop", "SrcK8s_Type": "Deployment", "SrcK8s_Name": "frontend",
             "DstK8s_Namespace": "shop", "DstK8s_Type": "Deployment", "DstK8s_Name": "cart"}
        ]"#,
    ))
    .await
    .unwrap();
    tx.send(records(
        r#"[{"FlowDirection": 0, "Bytes": 70, "SrcPort": 5432, "DstPort": 40000,
             "SrcK8s_Namespace": "data", "SrcK8s_Type": "StatefulSet", "SrcK8s_Name": "postgres",
             "DstK8s_Namespace": "shop", "DstK8s_Type": "Deployment", "DstK8s_Name": "cart"}]"#,
    ))
    .await
    .unwrap();
    drop(tx);

    // Shutdown inside run performs the final collection into the sink.
    tokio::spawn(exporter.run(rx))
        .await
        .expect("exporter stops without panicking");

    let exported = sink.get_finished_metrics().expect("metrics were exported");
    let resource_metrics = exported.last().expect("at least one export");
    assert_eq!(resource_metrics.scope_metrics.len(), 1);

    let scope = &resource_metrics.scope_metrics[0];
    assert_eq!(scope.scope.name(), METER_NAME);
    assert_eq!(scope.metrics.len(), 1);

    let metric = &scope.metrics[0];
    assert_eq!(metric.name, CONNECTIONS_OBSERVED);
    assert_eq!(metric.name, "ebpf.connections.observed");
    assert_eq!(metric.unit, CONNECTIONS_OBSERVED_UNIT);
    assert_eq!(metric.unit, "{bytes}");
    assert_eq!(metric.description, CONNECTIONS_OBSERVED_DESCRIPTION);

    let sum = metric
        .data
        .as_any()
        .downcast_ref::<Sum<u64>>()
        .expect("u64 counter exports a sum");
    assert!(sum.is_monotonic);
    assert_eq!(sum.data_points.len(), 2);

    let point = |server_name: &str| {
        sum.data_points
            .iter()
            .find(|dp| text(&dp.attributes, SERVER_NAME) == server_name)
            .unwrap_or_else(|| panic!("no data point for server {}", server_name))
    };
    let port = |attrs: &[KeyValue]| {
        attrs
            .iter()
            .find(|kv| kv.key.as_str() == SERVER_PORT)
            .map(|kv| kv.value.clone())
    };

    let cart = point("cart");
    assert_eq!(cart.value, 1500);
    assert_eq!(cart.attributes.len(), 9);
    assert_eq!(text(&cart.attributes, CLIENT_NAME), "frontend");
    assert_eq!(port(&cart.attributes), Some(Value::I64(443)));

    let postgres = point("postgres");
    assert_eq!(postgres.value, 70);
    assert_eq!(text(&postgres.attributes, CLIENT_NAME), "cart");
    assert_eq!(text(&postgres.attributes, SERVER_NAMESPACE), "data");
    assert_eq!(port(&postgres.attributes), Some(Value::I64(5432)));

    assert!(context.is_registered(CONNECTIONS_OBSERVED));
}

#[test]
fn test_second_registration_is_setup_error() {
    let context = MetricsContext::new(SdkMeterProvider::builder().build());
    assert!(context.connection_bytes_counter().is_ok());

    let err = Error::from(context.connection_bytes_counter().unwrap_err());
    assert!(matches!(
        err,
        Error::Setup(SetupError::DuplicateInstrument { .. })
    ));
    assert!(err.to_string().contains(CONNECTIONS_OBSERVED));
}

#[test]
fn test_factory_without_endpoint_does_not_start() {
    let result = beyla_network::metrics::metrics_exporter_provider(&ExportConfig::default());
    assert!(matches!(result, Err(SetupError::MissingEndpoint)));
}

#[test]
fn test_version_const() {
    assert!(!beyla_network::VERSION.is_empty());
}
