//! Configuration loading from disk and the process environment.
//!
//! Precedence: defaults, then the optional TOML file, then environment
//! variables.

use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use thiserror::Error;

use crate::config::schema::ServiceConfig;
use crate::config::validation::{validate_config, ValidationError};

/// Error type for configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid value {value:?} for {name}: {reason}")]
    Env {
        name: &'static str,
        value: String,
        reason: String,
    },
    #[error("validation failed: {}", join(.0))]
    Validation(Vec<ValidationError>),
}

fn join(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Load and validate configuration from an optional TOML file and the
/// process environment.
pub fn load_config(path: Option<&Path>) -> Result<ServiceConfig, ConfigError> {
    load_with_env(path, |name| std::env::var(name).ok())
}

/// Like [`load_config`] with an injected environment lookup.
pub fn load_with_env<F>(path: Option<&Path>, env: F) -> Result<ServiceConfig, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let mut config = match path {
        Some(path) => {
            let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
                path: path.to_path_buf(),
                source,
            })?;
            toml::from_str(&content)?
        }
        None => ServiceConfig::default(),
    };

    apply_env(&mut config, env)?;
    validate_config(&config).map_err(ConfigError::Validation)?;

    Ok(config)
}

/// Overlay recognized environment variables onto `config`.
pub fn apply_env<F>(config: &mut ServiceConfig, env: F) -> Result<(), ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let var = |name: &str| env(name).filter(|v| !v.trim().is_empty());

    if let Some(v) = var("SERVICE_NAME") {
        config.service_name = v;
    }
    if let Some(v) = var("PORT") {
        config.listener.port = Some(parse("PORT", &v)?);
    }
    if let Some(v) = var("GRPC_ENDPOINT") {
        config.peer.rpc_endpoint = with_scheme(&v);
    }
    if let Some(v) = var("PUBSUB_PUSH_ENDPOINT") {
        config.peer.push_endpoint = with_scheme(&v);
    }
    if let Some(v) = var("PUBSUB_TOPIC_ID") {
        config.peer.topic = v;
    }
    if let Some(v) = var("PUBSUB_SUBSCRIPTION_ID") {
        config.peer.subscription = v;
    }
    if let Some(v) = var("SHUTDOWN_GRACE_SECS") {
        config.shutdown.grace_period_secs = parse("SHUTDOWN_GRACE_SECS", &v)?;
    }
    if let Some(v) = var("OTLP_ENDPOINT") {
        config.tracing.otlp_endpoint = with_scheme(&v);
    }
    if let Some(v) = var("TRACE_SAMPLER") {
        config.tracing.sampler = parse("TRACE_SAMPLER", &v)?;
    }
    if let Some(v) = var("TRACE_SAMPLER_ARG") {
        config.tracing.sampler_arg = Some(parse("TRACE_SAMPLER_ARG", &v)?);
    }
    if let Some(v) = var("TRACE_EXPORTER") {
        config.tracing.exporter = parse("TRACE_EXPORTER", &v)?;
    }
    if let Some(v) = var("LOG_FORMAT") {
        config.logging.format = parse("LOG_FORMAT", &v)?;
    }
    if let Some(v) = var("LOG_LEVEL") {
        config.logging.level = v.trim().to_ascii_lowercase();
    }
    if let Some(v) = var("METRICS_ADDRESS") {
        config.metrics.address = v;
        config.metrics.enabled = true;
    }
    Ok(())
}

fn parse<T>(name: &'static str, value: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: ToString,
{
    value.trim().parse().map_err(|e: T::Err| ConfigError::Env {
        name,
        value: value.to_string(),
        reason: e.to_string(),
    })
}

/// `localhost:9090` style endpoints get an `http://` scheme.
fn with_scheme(endpoint: &str) -> String {
    let endpoint = endpoint.trim();
    if endpoint.contains("://") {
        endpoint.to_string()
    } else {
        format!("http://{endpoint}")
    }
}
