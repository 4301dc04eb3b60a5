//! Log enrichment: trace correlation and context-scoped fields.

use std::fmt;
use std::io::Write;
use std::sync::Arc;

use serde_json::Value;

use crate::observability::sink::{LogRecord, LogSink, SinkError};
use crate::propagation::{SpanId, TraceId};
use crate::telemetry::RequestContext;

type Lookup = dyn Fn(&RequestContext) -> Option<Value> + Send + Sync;

/// Immutable set of "always attach" fields.
///
/// Built once at startup and handed to the sink; never mutated afterwards,
/// so reads need no locking.
#[derive(Clone, Default)]
pub struct FieldRegistry {
    fields: Arc<[(String, Arc<Lookup>)]>,
}

impl FieldRegistry {
    pub fn builder() -> FieldRegistryBuilder {
        FieldRegistryBuilder::default()
    }

    /// Registry attaching the given scoped context fields under their own names.
    pub fn from_context_keys<I, K>(keys: I) -> Self
    where
        I: IntoIterator<Item = K>,
        K: Into<String>,
    {
        keys.into_iter()
            .fold(Self::builder(), |builder, key| builder.context_key(key))
            .build()
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    fn attach(&self, record: &mut LogRecord, ctx: &RequestContext) {
        for (name, lookup) in self.fields.iter() {
            if let Some(value) = lookup(ctx) {
                record.push_attr(name.clone(), value);
            }
        }
    }
}

impl fmt::Debug for FieldRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.fields.iter().map(|(name, _)| name))
            .finish()
    }
}

#[derive(Default)]
pub struct FieldRegistryBuilder {
    fields: Vec<(String, Arc<Lookup>)>,
}

impl FieldRegistryBuilder {
    /// Attach the scoped context field `key` when present.
    pub fn context_key(self, key: impl Into<String>) -> Self {
        let key = key.into();
        let lookup_key = key.clone();
        self.field(key, move |ctx| ctx.field(&lookup_key).cloned())
    }

    /// Attach the baggage member `key` when present.
    pub fn baggage_key(self, key: impl Into<String>) -> Self {
        let key = key.into();
        let lookup_key = key.clone();
        self.field(key, move |ctx| ctx.baggage().get(&lookup_key).map(Value::from))
    }

    /// Attach the value computed by `lookup` under `name` when it returns `Some`.
    pub fn field<F>(mut self, name: impl Into<String>, lookup: F) -> Self
    where
        F: Fn(&RequestContext) -> Option<Value> + Send + Sync + 'static,
    {
        self.fields.push((name.into(), Arc::new(lookup)));
        self
    }

    pub fn build(self) -> FieldRegistry {
        FieldRegistry {
            fields: self.fields.into(),
        }
    }
}

/// A sink that needs the logical request context to write a record.
pub trait ContextSink: Send + Sync {
    fn emit(&self, record: LogRecord, ctx: &RequestContext);
}

/// Decorator adding `trace_id`, `span_id` and registry fields to every record
/// before forwarding it to the wrapped sink.
///
/// Ids are always attached (all zeros without an active span) so the log
/// schema is stable. Write failures go to stderr and are swallowed.
pub struct EnrichingSink<S> {
    inner: S,
    fields: FieldRegistry,
}

impl<S: LogSink> EnrichingSink<S> {
    pub fn new(inner: S, fields: FieldRegistry) -> Self {
        Self { inner, fields }
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }

    pub fn enrich(&self, record: &mut LogRecord, ctx: &RequestContext) {
        let (trace_id, span_id) = ctx
            .span()
            .map(|span| (span.trace_id(), span.span_id()))
            .unwrap_or((TraceId::INVALID, SpanId::INVALID));
        record.push_attr("trace_id", trace_id.to_string());
        record.push_attr("span_id", span_id.to_string());
        self.fields.attach(record, ctx);
    }
}

impl<S: LogSink> ContextSink for EnrichingSink<S> {
    fn emit(&self, mut record: LogRecord, ctx: &RequestContext) {
        self.enrich(&mut record, ctx);
        if let Err(e) = self.inner.write(&record) {
            fallback(&e, &record);
        }
    }
}

fn fallback(error: &SinkError, record: &LogRecord) {
    let _ = writeln!(
        std::io::stderr().lock(),
        "log sink write failed: {error}; dropped {} record: {}",
        record.level,
        record.message
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observability::sink::MemorySink;
    use crate::propagation::Baggage;
    use crate::telemetry::SpanTracker;
    use tracing::Level;

    struct RejectingSink;

    impl LogSink for RejectingSink {
        fn write(&self, _record: &LogRecord) -> Result<(), SinkError> {
            Err(SinkError::Rejected("disk full".into()))
        }
    }

    #[test]
    fn active_span_ids_are_attached() {
        let memory = MemorySink::new();
        let sink = EnrichingSink::new(memory.clone(), FieldRegistry::default());
        let tracker = SpanTracker::new();
        let (span, ctx) = tracker.start_span(&RequestContext::new(), "op", None);

        sink.emit(LogRecord::new(Level::INFO, "processing"), &ctx);

        let record = &memory.records()[0];
        assert_eq!(record.attr("trace_id"), Some(&Value::from(span.trace_id().to_string())));
        assert_eq!(record.attr("span_id"), Some(&Value::from(span.span_id().to_string())));
    }

    #[test]
    fn no_span_yields_zero_ids_not_missing_fields() {
        let memory = MemorySink::new();
        let sink = EnrichingSink::new(memory.clone(), FieldRegistry::default());

        sink.emit(LogRecord::new(Level::INFO, "startup"), &RequestContext::new());

        let record = &memory.records()[0];
        assert_eq!(record.attr("trace_id"), Some(&Value::from("0".repeat(32))));
        assert_eq!(record.attr("span_id"), Some(&Value::from("0".repeat(16))));
    }

    #[test]
    fn registry_fields_attach_only_when_present() {
        let memory = MemorySink::new();
        let registry = FieldRegistry::builder()
            .context_key("request_id")
            .context_key("user_id")
            .baggage_key("tenant")
            .field("constant", |_| Some(Value::from(1)))
            .build();
        let sink = EnrichingSink::new(memory.clone(), registry);
        let baggage: Baggage = [("tenant", "acme")].into_iter().collect();
        let ctx = RequestContext::new()
            .with_field("request_id", "req-9")
            .with_baggage(baggage);

        sink.emit(LogRecord::new(Level::INFO, "hello"), &ctx);

        let record = &memory.records()[0];
        assert_eq!(record.attr("request_id"), Some(&Value::from("req-9")));
        assert_eq!(record.attr("tenant"), Some(&Value::from("acme")));
        assert_eq!(record.attr("constant"), Some(&Value::from(1)));
        assert_eq!(record.attr("user_id"), None);
    }

    #[test]
    fn rejected_write_is_swallowed() {
        let sink = EnrichingSink::new(RejectingSink, FieldRegistry::from_context_keys(["request_id"]));
        sink.emit(LogRecord::new(Level::ERROR, "lost"), &RequestContext::new());
    }

    #[test]
    fn concurrent_emits_share_one_registry() {
        let memory = MemorySink::new();
        let sink = Arc::new(EnrichingSink::new(
            memory.clone(),
            FieldRegistry::from_context_keys(["n"]),
        ));
        let handles: Vec<_> = (0..8)
            .map(|n| {
                let sink = sink.clone();
                std::thread::spawn(move || {
                    let ctx = RequestContext::new().with_field("n", n);
                    for _ in 0..50 {
                        sink.emit(LogRecord::new(Level::INFO, "tick"), &ctx);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(memory.records().len(), 400);
        assert!(memory.records().iter().all(|r| r.attr("n").is_some()));
    }
}
