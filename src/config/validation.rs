//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate endpoints and bind addresses
//! - Validate value ranges (timeouts > 0, ratios in [0, 1])
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: ServiceConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::net::SocketAddr;

use thiserror::Error;
use tracing::Level;
use url::Url;

use crate::config::schema::{SamplerKind, ServiceConfig};

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    #[error("service_name must not be empty")]
    EmptyServiceName,
    #[error("{field} is not a valid URL ({value}): {reason}")]
    InvalidEndpoint {
        field: &'static str,
        value: String,
        reason: String,
    },
    #[error("{0} must be greater than zero")]
    Zero(&'static str),
    #[error("sampler ratio must be within [0, 1], got {0}")]
    RatioOutOfRange(f64),
    #[error("rate-limited sampler needs a positive spans-per-second argument")]
    MissingRate,
    #[error("unknown log level '{0}'")]
    LogLevel(String),
    #[error("invalid metrics address '{0}'")]
    MetricsAddress(String),
}

pub fn validate_config(config: &ServiceConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.service_name.trim().is_empty() {
        errors.push(ValidationError::EmptyServiceName);
    }

    check_url(&mut errors, "peer.rpc_endpoint", &config.peer.rpc_endpoint);
    check_url(&mut errors, "peer.push_endpoint", &config.peer.push_endpoint);
    check_url(&mut errors, "tracing.otlp_endpoint", &config.tracing.otlp_endpoint);

    let positive = [
        ("shutdown.grace_period_secs", config.shutdown.grace_period_secs),
        ("shutdown.close_timeout_secs", config.shutdown.close_timeout_secs),
        ("listener.request_timeout_secs", config.listener.request_timeout_secs),
        ("peer.timeout_secs", config.peer.timeout_secs),
        ("tracing.export_timeout_secs", config.tracing.export_timeout_secs),
        ("tracing.queue_capacity", config.tracing.queue_capacity as u64),
        ("tracing.max_batch_size", config.tracing.max_batch_size as u64),
        ("tracing.batch_interval_ms", config.tracing.batch_interval_ms),
    ];
    for (field, value) in positive {
        if value == 0 {
            errors.push(ValidationError::Zero(field));
        }
    }

    match config.tracing.sampler {
        SamplerKind::Ratio | SamplerKind::ParentRatio => {
            let ratio = config.tracing.sampler_arg.unwrap_or(1.0);
            if !(0.0..=1.0).contains(&ratio) {
                errors.push(ValidationError::RatioOutOfRange(ratio));
            }
        }
        SamplerKind::RateLimited => {
            if !config.tracing.sampler_arg.is_some_and(|rate| rate > 0.0) {
                errors.push(ValidationError::MissingRate);
            }
        }
        SamplerKind::Always | SamplerKind::Never => {}
    }

    if config.logging.level.parse::<Level>().is_err() {
        errors.push(ValidationError::LogLevel(config.logging.level.clone()));
    }

    if config.metrics.enabled && config.metrics.address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::MetricsAddress(config.metrics.address.clone()));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn check_url(errors: &mut Vec<ValidationError>, field: &'static str, value: &str) {
    if let Err(e) = Url::parse(value) {
        errors.push(ValidationError::InvalidEndpoint {
            field,
            value: value.to_string(),
            reason: e.to_string(),
        });
    }
}
