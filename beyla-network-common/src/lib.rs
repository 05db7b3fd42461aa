//! Flow record types shared between the flow producer and the exporter
//!
//! A flow record is a flat, semi-structured map produced upstream (by the
//! kernel probe tooling). Fields may be absent or carry an unexpected type;
//! every accessor here reads such fields as missing instead of failing.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Field names emitted by the flow producer
pub mod fields {
    pub const FLOW_DIRECTION: &str = "FlowDirection";
    pub const BYTES: &str = "Bytes";
    pub const SRC_PORT: &str = "SrcPort";
    pub const DST_PORT: &str = "DstPort";
    pub const SRC_ADDR: &str = "SrcAddr";
    pub const DST_ADDR: &str = "DstAddr";
    pub const SRC_HOST: &str = "SrcHost";
    pub const DST_HOST: &str = "DstHost";

    /// Prefixes of the Kubernetes metadata family (`SrcK8s_Name`, ...)
    pub const SRC_K8S_PREFIX: &str = "SrcK8s_";
    pub const DST_K8S_PREFIX: &str = "DstK8s_";
}

/// Kubernetes metadata suffixes appended to the `*K8s_` prefixes
pub mod k8s {
    pub const NAMESPACE: &str = "Namespace";
    pub const TYPE: &str = "Type";
    pub const NAME: &str = "Name";
}

/// Raw `FlowDirection` values
pub mod direction {
    pub const CLIENT_IS_DESTINATION: i64 = 0;
    pub const CLIENT_IS_SOURCE: i64 = 1;
}

/// Dynamically typed value of a single flow record field
///
/// `Other` keeps any JSON value that is neither an integer nor a string
/// (floats, booleans, nulls, nested values). It always reads as missing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FlowValue {
    Int(i64),
    Str(String),
    Other(serde_json::Value),
}

impl FlowValue {
    pub fn as_int(&self) -> Option<i64> {
        match self {
            FlowValue::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            FlowValue::Str(v) => Some(v.as_str()),
            _ => None,
        }
    }
}

impl From<i64> for FlowValue {
    fn from(v: i64) -> Self {
        FlowValue::Int(v)
    }
}

impl From<u32> for FlowValue {
    fn from(v: u32) -> Self {
        FlowValue::Int(i64::from(v))
    }
}

impl From<u16> for FlowValue {
    fn from(v: u16) -> Self {
        FlowValue::Int(i64::from(v))
    }
}

impl From<&str> for FlowValue {
    fn from(v: &str) -> Self {
        FlowValue::Str(v.to_string())
    }
}

impl From<String> for FlowValue {
    fn from(v: String) -> Self {
        FlowValue::Str(v)
    }
}

/// Which side of a record a field belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Endpoint {
    Source,
    Destination,
}

impl Endpoint {
    fn k8s_prefix(self) -> &'static str {
        match self {
            Endpoint::Source => fields::SRC_K8S_PREFIX,
            Endpoint::Destination => fields::DST_K8S_PREFIX,
        }
    }

    fn port_field(self) -> &'static str {
        match self {
            Endpoint::Source => fields::SRC_PORT,
            Endpoint::Destination => fields::DST_PORT,
        }
    }

    fn host_field(self) -> &'static str {
        match self {
            Endpoint::Source => fields::SRC_HOST,
            Endpoint::Destination => fields::DST_HOST,
        }
    }

    fn addr_field(self) -> &'static str {
        match self {
            Endpoint::Source => fields::SRC_ADDR,
            Endpoint::Destination => fields::DST_ADDR,
        }
    }
}

/// One observed network flow
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FlowRecord {
    fields: BTreeMap<String, FlowValue>,
}

impl FlowRecord {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert, mostly useful for producers and tests
    pub fn with(mut self, key: impl Into<String>, value: impl Into<FlowValue>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<FlowValue>) {
        self.fields.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&FlowValue> {
        self.fields.get(key)
    }

    /// Integer field, `None` when absent or not an integer
    pub fn int(&self, key: &str) -> Option<i64> {
        self.get(key).and_then(FlowValue::as_int)
    }

    /// String field, `None` when absent or not a string
    pub fn str(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(FlowValue::as_str)
    }

    /// String field, empty when absent or mistyped
    pub fn str_or_empty(&self, key: &str) -> &str {
        self.str(key).unwrap_or("")
    }

    /// Raw `FlowDirection`, 0 when absent or mistyped
    pub fn flow_direction(&self) -> i64 {
        self.int(fields::FLOW_DIRECTION)
            .unwrap_or(direction::CLIENT_IS_DESTINATION)
    }

    /// Transferred bytes. Absent, mistyped and negative values read as 0.
    pub fn bytes(&self) -> u64 {
        self.int(fields::BYTES)
            .and_then(|v| u64::try_from(v).ok())
            .unwrap_or(0)
    }

    /// Port of one endpoint, 0 when absent or mistyped
    pub fn port(&self, endpoint: Endpoint) -> i64 {
        self.int(endpoint.port_field()).unwrap_or(0)
    }

    /// Kubernetes metadata field (`Namespace`, `Type`, `Name`) of one endpoint
    pub fn k8s_field(&self, endpoint: Endpoint, suffix: &str) -> &str {
        let key = format!("{}{}", endpoint.k8s_prefix(), suffix);
        self.str_or_empty(&key)
    }

    pub fn host(&self, endpoint: Endpoint) -> &str {
        self.str_or_empty(endpoint.host_field())
    }

    pub fn addr(&self, endpoint: Endpoint) -> &str {
        self.str_or_empty(endpoint.addr_field())
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

impl<K, V> FromIterator<(K, V)> for FlowRecord
where
    K: Into<String>,
    V: Into<FlowValue>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut record = FlowRecord::new();
        for (k, v) in iter {
            record.insert(k, v);
        }
        record
    }
}
