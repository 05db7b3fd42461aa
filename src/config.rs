//! Export configuration
//!
//! Loaded from YAML and then overridden from the environment, the way the
//! OpenTelemetry SDKs read `OTEL_EXPORTER_OTLP_*`.

use crate::{Error, Result};
use serde::{Deserialize, Deserializer};
use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::time::Duration;

pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(10);
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

pub const ENV_ENDPOINT: &str = "OTEL_EXPORTER_OTLP_ENDPOINT";
pub const ENV_METRICS_ENDPOINT: &str = "OTEL_EXPORTER_OTLP_METRICS_ENDPOINT";
pub const ENV_PROTOCOL: &str = "OTEL_EXPORTER_OTLP_PROTOCOL";
pub const ENV_METRICS_PROTOCOL: &str = "OTEL_EXPORTER_OTLP_METRICS_PROTOCOL";
pub const ENV_INTERVAL: &str = "BEYLA_METRICS_INTERVAL";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ExportConfig {
    pub metrics: MetricsConfig,
    pub environment: EnvironmentTags,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MetricsConfig {
    pub endpoint: Option<String>,
    pub protocol: Protocol,
    #[serde(deserialize_with = "deserialize_duration")]
    pub interval: Duration,
    #[serde(deserialize_with = "deserialize_duration")]
    pub timeout: Duration,
    pub temporality: Temporality,
    pub headers: HashMap<String, String>,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            protocol: Protocol::default(),
            interval: DEFAULT_INTERVAL,
            timeout: DEFAULT_TIMEOUT,
            temporality: Temporality::default(),
            headers: HashMap::new(),
        }
    }
}

impl MetricsConfig {
    /// Metrics export only runs with an endpoint to send to
    pub fn is_enabled(&self) -> bool {
        self.endpoint.as_deref().is_some_and(|e| !e.trim().is_empty())
    }

    pub fn validate(&self) -> Result<()> {
        if self.interval.is_zero() {
            return Err(Error::Config("metrics interval must be positive".into()));
        }
        if self.timeout.is_zero() {
            return Err(Error::Config("metrics timeout must be positive".into()));
        }
        Ok(())
    }
}

/// Static tags appended to every observation
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EnvironmentTags {
    pub env: String,
    pub site: String,
}

impl Default for EnvironmentTags {
    fn default() -> Self {
        Self {
            env: "dev".to_string(),
            site: "beekeepers".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
pub enum Protocol {
    #[default]
    #[serde(rename = "grpc")]
    Grpc,
    #[serde(rename = "http/protobuf")]
    HttpProtobuf,
}

impl Protocol {
    pub fn parse(s: &str) -> Result<Self> {
        match s.trim() {
            "grpc" => Ok(Protocol::Grpc),
            "http/protobuf" => Ok(Protocol::HttpProtobuf),
            other => Err(Error::Config(format!("unsupported OTLP protocol: {}", other))),
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Protocol::Grpc => write!(f, "grpc"),
            Protocol::HttpProtobuf => write!(f, "http/protobuf"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Temporality {
    #[default]
    Cumulative,
    Delta,
}

impl ExportConfig {
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let config: ExportConfig = serde_yaml::from_str(yaml)
            .map_err(|e| Error::Config(format!("invalid export config: {}", e)))?;
        config.metrics.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let contents = std::fs::read_to_string(path.as_ref())?;
        Self::from_yaml_str(&contents)
    }

    /// Applies overrides from the process environment
    pub fn apply_process_env(&mut self) -> Result<()> {
        self.apply_env(|key| std::env::var(key).ok())
    }

    /// Applies overrides read through `lookup`. Signal-specific variables win
    /// over the generic OTLP ones.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(endpoint) = non_empty(ENV_METRICS_ENDPOINT).or_else(|| non_empty(ENV_ENDPOINT)) {
            self.metrics.endpoint = Some(endpoint);
        }

        if let Some(protocol) = non_empty(ENV_METRICS_PROTOCOL).or_else(|| non_empty(ENV_PROTOCOL)) {
            self.metrics.protocol = Protocol::parse(&protocol)?;
        }

        if let Some(interval) = non_empty(ENV_INTERVAL) {
            self.metrics.interval = parse_duration(&interval)?;
        }

        self.metrics.validate()
    }
}

/// Parses `"250ms"`, `"10s"`, `"1m"` or a bare number of seconds
pub fn parse_duration(s: &str) -> Result<Duration> {
    let s = s.trim();
    let invalid = || Error::Config(format!("invalid duration: {:?}", s));

    let (digits, unit) = match s.find(|c: char| !c.is_ascii_digit()) {
        Some(idx) => s.split_at(idx),
        None => (s, "s"),
    };

    let value: u64 = digits.parse().map_err(|_| invalid())?;

    match unit {
        "ms" => Ok(Duration::from_millis(value)),
        "s" => Ok(Duration::from_secs(value)),
        "m" => value
            .checked_mul(60)
            .map(Duration::from_secs)
            .ok_or_else(invalid),
        _ => Err(invalid()),
    }
}

fn deserialize_duration<'de, D>(deserializer: D) -> std::result::Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Secs(u64),
        Text(String),
    }

    match Raw::deserialize(deserializer)? {
        Raw::Secs(secs) => Ok(Duration::from_secs(secs)),
        Raw::Text(text) => parse_duration(&text).map_err(serde::de::Error::custom),
    }
}
