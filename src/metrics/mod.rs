pub mod collector;
pub mod counter;
pub mod exporter;

pub use collector::FlowCollector;
pub use counter::{ConnectionBytesCounter, ConnectionCounter};
pub use exporter::{metrics_exporter_provider, FlowMetricsExporter, MetricsContext};
