//! Structured logging setup.
//!
//! # Responsibilities
//! - Initialize the process-wide `tracing` subscriber
//! - Build the request logger (base sink + enrichment) from config
//!
//! # Design Decisions
//! - JSON for production, pretty for development, one knob for both streams
//! - `RUST_LOG` overrides the configured level

use tracing::Level;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, util::TryInitError, EnvFilter};

use crate::config::{LogFormat, LoggingConfig};
use crate::observability::enrich::FieldRegistry;
use crate::observability::logger::Logger;
use crate::observability::sink::{JsonSink, TracingSink};

/// Install the global subscriber for process-level logs.
pub fn init_subscriber(config: &LoggingConfig) -> Result<(), TryInitError> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("{},tower_http=info", config.level)));
    let registry = tracing_subscriber::registry().with(filter);

    match config.format {
        LogFormat::Json => registry.with(tracing_subscriber::fmt::layer().json()).try_init(),
        LogFormat::Pretty => registry.with(tracing_subscriber::fmt::layer()).try_init(),
    }
}

/// Build the request logger described by `config`.
///
/// JSON format writes request records straight to stdout; pretty format
/// routes them through the `tracing` subscriber.
pub fn request_logger(config: &LoggingConfig) -> Logger {
    let fields = FieldRegistry::from_context_keys(config.context_fields.iter().cloned());
    match config.format {
        LogFormat::Json => Logger::enriching(JsonSink::stdout(min_level(config)), fields),
        LogFormat::Pretty => Logger::enriching(TracingSink, fields),
    }
}

fn min_level(config: &LoggingConfig) -> Level {
    config.level.parse().unwrap_or(Level::INFO)
}
