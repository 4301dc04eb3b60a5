//! Request-scoped logger handle.

use std::sync::Arc;

use serde_json::Value;
use tracing::Level;

use crate::observability::enrich::{ContextSink, EnrichingSink, FieldRegistry};
use crate::observability::sink::{LogRecord, LogSink};
use crate::telemetry::RequestContext;

/// Cheap-to-clone front for an enriching sink.
///
/// Call sites pass the request context and a message; correlation ids and
/// registered fields are added by the sink.
#[derive(Clone)]
pub struct Logger {
    sink: Arc<dyn ContextSink>,
}

impl Logger {
    pub fn new(sink: impl ContextSink + 'static) -> Self {
        Self {
            sink: Arc::new(sink),
        }
    }

    /// Wrap a base sink with enrichment.
    pub fn enriching(base: impl LogSink + 'static, fields: FieldRegistry) -> Self {
        Self::new(EnrichingSink::new(base, fields))
    }

    pub fn emit(&self, ctx: &RequestContext, record: LogRecord) {
        self.sink.emit(record, ctx);
    }

    pub fn log(&self, ctx: &RequestContext, level: Level, message: impl Into<String>) {
        self.emit(ctx, LogRecord::new(level, message));
    }

    pub fn debug(&self, ctx: &RequestContext, message: impl Into<String>) {
        self.log(ctx, Level::DEBUG, message);
    }

    pub fn info(&self, ctx: &RequestContext, message: impl Into<String>) {
        self.log(ctx, Level::INFO, message);
    }

    pub fn warn(&self, ctx: &RequestContext, message: impl Into<String>) {
        self.log(ctx, Level::WARN, message);
    }

    pub fn error(&self, ctx: &RequestContext, message: impl Into<String>) {
        self.log(ctx, Level::ERROR, message);
    }

    /// Error line with an `error` attribute.
    pub fn error_with(&self, ctx: &RequestContext, message: impl Into<String>, error: &dyn std::error::Error) {
        self.emit(
            ctx,
            LogRecord::new(Level::ERROR, message).with_attr("error", Value::from(error.to_string())),
        );
    }
}

impl std::fmt::Debug for Logger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Logger").finish_non_exhaustive()
    }
}
