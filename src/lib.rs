//! Flow metrics enrichment and export
//!
//! Consumes batches of flow records, derives client/server roles and
//! Kubernetes workload identity for each record, and counts the observed bytes
//! on an OTLP-exported counter.

pub mod config;
pub mod error;
pub mod flows;
pub mod metrics;

pub use beyla_network_common::{FlowRecord, FlowValue};
pub use config::ExportConfig;
pub use error::{Error, Result, SetupError};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
