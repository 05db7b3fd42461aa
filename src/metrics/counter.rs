use opentelemetry::metrics::Counter;
use opentelemetry::KeyValue;
use std::sync::Arc;

pub const CONNECTIONS_OBSERVED: &str = "ebpf.connections.observed";
pub const CONNECTIONS_OBSERVED_DESCRIPTION: &str =
    "total bytes_sent value of connections observed by probe since its launch";
pub const CONNECTIONS_OBSERVED_UNIT: &str = "{bytes}";

/// Sink for per-flow byte observations
///
/// `add` must not block: it runs once per record on the ingestion path.
pub trait ConnectionCounter: Send + Sync {
    fn add(&self, bytes: u64, attributes: &[KeyValue]);
}

impl<T: ConnectionCounter + ?Sized> ConnectionCounter for Arc<T> {
    fn add(&self, bytes: u64, attributes: &[KeyValue]) {
        (**self).add(bytes, attributes)
    }
}

/// `ebpf.connections.observed` backed by an OpenTelemetry counter
///
/// The SDK aggregates in memory; export happens on the periodic reader.
#[derive(Clone)]
pub struct ConnectionBytesCounter {
    inner: Counter<u64>,
}

impl ConnectionBytesCounter {
    pub(crate) fn new(inner: Counter<u64>) -> Self {
        Self { inner }
    }
}

impl ConnectionCounter for ConnectionBytesCounter {
    fn add(&self, bytes: u64, attributes: &[KeyValue]) {
        self.inner.add(bytes, attributes);
    }
}

impl std::fmt::Debug for ConnectionBytesCounter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionBytesCounter")
            .field("name", &CONNECTIONS_OBSERVED)
            .finish()
    }
}
