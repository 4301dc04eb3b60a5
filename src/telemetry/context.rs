//! Logical request context.
//!
//! An immutable value threaded explicitly through a call chain. Deriving a
//! new context (`with_span`, `with_field`, `child`) never changes the one it
//! was derived from, so a context can be shared across tasks freely.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::Value;
use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};

use crate::propagation::{self, Baggage, Carrier, TraceContext};
use crate::telemetry::span::Span;

#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    span: Option<Span>,
    baggage: Arc<Baggage>,
    fields: Arc<BTreeMap<String, Value>>,
    cancel: CancellationToken,
}

impl RequestContext {
    /// A root context with no span, no fields and its own cancellation.
    pub fn new() -> Self {
        Self::default()
    }

    /// A root context cancelled whenever `token` is.
    pub fn with_cancellation(token: &CancellationToken) -> Self {
        Self {
            cancel: token.child_token(),
            ..Self::default()
        }
    }

    /// Currently active span, if any.
    pub fn span(&self) -> Option<&Span> {
        self.span.as_ref()
    }

    pub fn trace_context(&self) -> Option<TraceContext> {
        self.span.as_ref().map(Span::context)
    }

    pub fn baggage(&self) -> &Baggage {
        &self.baggage
    }

    /// Scoped field lookup.
    pub fn field(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    pub fn fields(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn with_span(&self, span: Span) -> Self {
        Self {
            span: Some(span),
            ..self.clone()
        }
    }

    pub fn with_baggage(&self, baggage: Baggage) -> Self {
        Self {
            baggage: Arc::new(baggage),
            ..self.clone()
        }
    }

    /// Derive a context carrying one more scoped field.
    pub fn with_field(&self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        let mut fields = BTreeMap::clone(&self.fields);
        fields.insert(key.into(), value.into());
        Self {
            fields: Arc::new(fields),
            ..self.clone()
        }
    }

    /// Derive a context whose cancellation can be triggered independently,
    /// but which is still cancelled together with this one.
    pub fn child(&self) -> Self {
        Self {
            cancel: self.cancel.child_token(),
            ..self.clone()
        }
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn cancelled(&self) -> WaitForCancellationFuture<'_> {
        self.cancel.cancelled()
    }

    /// Carrier for an outbound call made on behalf of this context.
    ///
    /// Empty (apart from baggage) when no span is active.
    pub fn outbound_carrier(&self) -> Carrier {
        match self.trace_context() {
            Some(ctx) => propagation::encode(&ctx, &self.baggage),
            None => {
                let mut carrier = Carrier::new();
                if let Some(header) = self.baggage.to_header() {
                    carrier.insert(propagation::BAGGAGE_HEADER, header);
                }
                carrier
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::propagation::{SpanId, TraceId};
    use crate::telemetry::span::SpanKind;

    #[test]
    fn derived_contexts_leave_parent_untouched() {
        let parent = RequestContext::new().with_field("request_id", "r-1");
        let child = parent.with_field("user", "alice");

        assert_eq!(parent.field("user"), None);
        assert_eq!(child.field("request_id"), Some(&Value::from("r-1")));
        assert_eq!(child.field("user"), Some(&Value::from("alice")));
    }

    #[test]
    fn cancelling_parent_cancels_children_only_downward() {
        let parent = RequestContext::new();
        let child = parent.child();
        child.cancellation().cancel();
        assert!(!parent.is_cancelled());

        let other = parent.child();
        parent.cancellation().cancel();
        assert!(other.is_cancelled());
    }

    #[test]
    fn outbound_carrier_encodes_active_span() {
        let ctx = TraceContext::new(TraceId::from_u128(0xabc), SpanId::from_u64(0xdef), true);
        let span = Span::new(ctx, None, "op".into(), SpanKind::Server);
        let request = RequestContext::new().with_span(span);

        let decoded = propagation::decode(&request.outbound_carrier());
        assert_eq!(decoded.context, Some(ctx));
        assert!(RequestContext::new().outbound_carrier().is_empty());
    }
}
