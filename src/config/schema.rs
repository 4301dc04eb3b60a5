//! Configuration schema definitions.
//!
//! This module defines the configuration shared by the three service roles.
//! All types derive Serde traits for deserialization from config files.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Which of the three services this process runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Api,
    Rpc,
    Consumer,
}

impl Role {
    pub fn default_port(self) -> u16 {
        match self {
            Role::Api => 8080,
            Role::Rpc => 9090,
            Role::Consumer => 8085,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Role::Api => "api",
            Role::Rpc => "rpc",
            Role::Consumer => "consumer",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Root configuration for a service process.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// Reported as `service.name` on exported spans.
    pub service_name: String,

    pub listener: ListenerConfig,

    /// Downstream endpoints used by the API role.
    pub peer: PeerConfig,

    pub shutdown: ShutdownConfig,

    pub tracing: TracingConfig,

    pub logging: LoggingConfig,

    pub metrics: MetricsConfig,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            service_name: "tracewire".to_string(),
            listener: ListenerConfig::default(),
            peer: PeerConfig::default(),
            shutdown: ShutdownConfig::default(),
            tracing: TracingConfig::default(),
            logging: LoggingConfig::default(),
            metrics: MetricsConfig::default(),
        }
    }
}

impl ServiceConfig {
    /// `host:port`, using the role's default port when none is configured.
    pub fn bind_address(&self, role: Role) -> String {
        let port = self.listener.port.unwrap_or_else(|| role.default_port());
        format!("{}:{}", self.listener.host, port)
    }
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind host (e.g., "0.0.0.0").
    pub host: String,

    /// Listen port. Falls back to the role default.
    pub port: Option<u16>,

    /// Upper bound on handling one inbound HTTP request, in seconds.
    pub request_timeout_secs: u64,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: None,
            request_timeout_secs: 30,
        }
    }
}

impl ListenerConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// Downstream dependencies of the HTTP front door.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct PeerConfig {
    /// RPC backend endpoint.
    pub rpc_endpoint: String,

    /// Where published messages are pushed (the consumer's push route).
    pub push_endpoint: String,

    /// Topic name stamped on published messages.
    pub topic: String,

    /// Subscription name stamped on push deliveries.
    pub subscription: String,

    /// Timeout for each outbound call, in seconds.
    pub timeout_secs: u64,
}

impl Default for PeerConfig {
    fn default() -> Self {
        Self {
            rpc_endpoint: "http://localhost:9090".to_string(),
            push_endpoint: "http://localhost:8085/push".to_string(),
            topic: "health".to_string(),
            subscription: "health-push".to_string(),
            timeout_secs: 5,
        }
    }
}

impl PeerConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Graceful shutdown configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ShutdownConfig {
    /// How long in-flight work may drain before it is force-terminated.
    pub grace_period_secs: u64,

    /// Upper bound on closing a single resource, in seconds.
    pub close_timeout_secs: u64,
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self {
            grace_period_secs: 5,
            close_timeout_secs: 5,
        }
    }
}

impl ShutdownConfig {
    pub fn grace_period(&self) -> Duration {
        Duration::from_secs(self.grace_period_secs)
    }

    pub fn close_timeout(&self) -> Duration {
        Duration::from_secs(self.close_timeout_secs)
    }
}

/// Sampling policy applied when a span ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SamplerKind {
    Always,
    Never,
    /// Fraction of traces, keyed on the trace id (`sampler_arg` = ratio).
    Ratio,
    /// Follow the caller's decision; ratio for roots.
    ParentRatio,
    /// At most `sampler_arg` sampled spans per second.
    RateLimited,
}

impl FromStr for SamplerKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "always" | "always_on" => Ok(SamplerKind::Always),
            "never" | "always_off" => Ok(SamplerKind::Never),
            "ratio" | "traceidratio" => Ok(SamplerKind::Ratio),
            "parent_ratio" | "parentbased_traceidratio" => Ok(SamplerKind::ParentRatio),
            "rate_limited" => Ok(SamplerKind::RateLimited),
            other => Err(format!("unknown sampler '{other}'")),
        }
    }
}

/// Destination for sampled spans.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExporterKind {
    Otlp,
    Log,
    None,
}

impl FromStr for ExporterKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "otlp" => Ok(ExporterKind::Otlp),
            "log" | "console" => Ok(ExporterKind::Log),
            "none" => Ok(ExporterKind::None),
            other => Err(format!("unknown exporter '{other}'")),
        }
    }
}

/// Span sampling and export configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TracingConfig {
    pub sampler: SamplerKind,

    /// Ratio for ratio samplers, spans per second for the rate limiter.
    pub sampler_arg: Option<f64>,

    pub exporter: ExporterKind,

    /// OTLP/HTTP collector base URL; `/v1/traces` is appended.
    pub otlp_endpoint: String,

    /// Timeout for one export request, in seconds.
    pub export_timeout_secs: u64,

    /// Spans buffered between `end_span` and export.
    pub queue_capacity: usize,

    pub max_batch_size: usize,

    pub batch_interval_ms: u64,
}

impl Default for TracingConfig {
    fn default() -> Self {
        Self {
            sampler: SamplerKind::Always,
            sampler_arg: None,
            exporter: ExporterKind::Otlp,
            otlp_endpoint: "http://localhost:4318".to_string(),
            export_timeout_secs: 10,
            queue_capacity: 2048,
            max_batch_size: 512,
            batch_interval_ms: 5000,
        }
    }
}

impl TracingConfig {
    pub fn export_timeout(&self) -> Duration {
        Duration::from_secs(self.export_timeout_secs)
    }

    pub fn batch_interval(&self) -> Duration {
        Duration::from_millis(self.batch_interval_ms)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Json,
    Pretty,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "json" => Ok(LogFormat::Json),
            "pretty" | "text" => Ok(LogFormat::Pretty),
            other => Err(format!("unknown log format '{other}'")),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub format: LogFormat,

    /// Log level (trace, debug, info, warn, error).
    pub level: String,

    /// Context fields attached to every request log line when present.
    pub context_fields: Vec<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            format: LogFormat::Json,
            level: "info".to_string(),
            context_fields: vec!["request_id".to_string()],
        }
    }
}

/// Metrics configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct MetricsConfig {
    /// Enable the Prometheus scrape endpoint.
    pub enabled: bool,

    /// Metrics endpoint bind address.
    pub address: String,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            address: "0.0.0.0:9464".to_string(),
        }
    }
}
