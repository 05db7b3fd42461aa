//! Client/server role derivation for flow records
//!
//! Turns one [`FlowRecord`] into the attribute set attached to its counter
//! observation. Derivation is total: missing or mistyped fields degrade to
//! empty strings, zero ports and the `external` kind.

use super::direction::Direction;
use crate::config::EnvironmentTags;
use beyla_network_common::{k8s, Endpoint, FlowRecord};
use opentelemetry::{KeyValue, Value};

pub const CLIENT_NAME: &str = "client.name";
pub const CLIENT_NAMESPACE: &str = "client.namespace";
pub const CLIENT_KIND: &str = "client.kind";
pub const SERVER_NAME: &str = "server.name";
pub const SERVER_NAMESPACE: &str = "server.namespace";
pub const SERVER_KIND: &str = "server.kind";
pub const SERVER_PORT: &str = "server.port";
pub const ASSERTS_ENV: &str = "asserts.env";
pub const ASSERTS_SITE: &str = "asserts.site";

/// Kind reported for endpoints outside any known workload
pub const EXTERNAL_KIND: &str = "external";

/// Identity of one side of a flow
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Role {
    pub name: String,
    pub namespace: String,
    pub kind: String,
}

impl Role {
    pub fn of(record: &FlowRecord, endpoint: Endpoint) -> Self {
        let kind = match record.k8s_field(endpoint, k8s::TYPE) {
            "" => EXTERNAL_KIND,
            kind => kind,
        };

        // First non-empty of workload name, host name, address.
        let name = [
            record.k8s_field(endpoint, k8s::NAME),
            record.host(endpoint),
            record.addr(endpoint),
        ]
        .into_iter()
        .find(|candidate| !candidate.is_empty())
        .unwrap_or("");

        Self {
            name: name.to_string(),
            namespace: record.k8s_field(endpoint, k8s::NAMESPACE).to_string(),
            kind: kind.to_string(),
        }
    }
}

/// Heuristic server port: the lower of the two ports, missing ports count as 0.
///
/// Relies on listening ports being lower than ephemeral ones. Flows between two
/// ephemeral ports are labelled with whichever is lower.
pub fn server_port(record: &FlowRecord) -> i64 {
    let src = record.port(Endpoint::Source);
    let dst = record.port(Endpoint::Destination);
    if dst < src {
        dst
    } else {
        src
    }
}

/// Ordered labels attached to one counter observation
#[derive(Debug, Clone, PartialEq)]
pub struct AttributeSet(Vec<KeyValue>);

impl AttributeSet {
    pub fn as_slice(&self) -> &[KeyValue] {
        &self.0
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0
            .iter()
            .find(|kv| kv.key.as_str() == key)
            .map(|kv| &kv.value)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(|kv| kv.key.as_str())
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn into_inner(self) -> Vec<KeyValue> {
        self.0
    }
}

/// Derives the attribute set for one record
pub fn derive_attributes(record: &FlowRecord, tags: &EnvironmentTags) -> AttributeSet {
    let direction = Direction::of(record);
    let client = Role::of(record, direction.endpoint());
    let server = Role::of(record, direction.opposite().endpoint());

    AttributeSet(vec![
        KeyValue::new(CLIENT_NAME, client.name),
        KeyValue::new(CLIENT_NAMESPACE, client.namespace),
        KeyValue::new(CLIENT_KIND, client.kind),
        KeyValue::new(SERVER_NAME, server.name),
        KeyValue::new(SERVER_NAMESPACE, server.namespace),
        KeyValue::new(SERVER_KIND, server.kind),
        KeyValue::new(SERVER_PORT, server_port(record)),
        KeyValue::new(ASSERTS_ENV, tags.env.clone()),
        KeyValue::new(ASSERTS_SITE, tags.site.clone()),
    ])
}
