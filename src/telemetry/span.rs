//! Span handles and their exported snapshot.

use std::fmt;
use std::sync::{Arc, Mutex, OnceLock, PoisonError};
use std::time::SystemTime;

use serde::Serialize;

use crate::propagation::{SpanId, TraceContext, TraceId};

/// Role of a span relative to the transport that produced it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SpanKind {
    Internal,
    /// Inbound request/response call (HTTP, RPC).
    Server,
    /// Outbound request/response call.
    Client,
    /// One-shot message delivery.
    Consumer,
}

impl SpanKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SpanKind::Internal => "internal",
            SpanKind::Server => "server",
            SpanKind::Client => "client",
            SpanKind::Consumer => "consumer",
        }
    }
}

/// Terminal status of a span.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SpanStatus {
    Ok,
    /// The handler returned an error.
    Error,
    /// The call was torn down before the handler returned (panic, cancellation).
    Aborted,
}

impl SpanStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SpanStatus::Ok => "ok",
            SpanStatus::Error => "error",
            SpanStatus::Aborted => "aborted",
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct SpanEnd {
    time: SystemTime,
    status: SpanStatus,
}

struct SpanInner {
    context: TraceContext,
    parent_span_id: Option<SpanId>,
    name: String,
    kind: SpanKind,
    start_time: SystemTime,
    attributes: Mutex<Vec<(String, String)>>,
    end: OnceLock<SpanEnd>,
}

/// One unit of work within a trace.
///
/// Cloning yields another handle to the same span. Identity fields never
/// change; the end marker is written at most once.
#[derive(Clone)]
pub struct Span {
    inner: Arc<SpanInner>,
}

impl Span {
    pub(crate) fn new(
        context: TraceContext,
        parent_span_id: Option<SpanId>,
        name: String,
        kind: SpanKind,
    ) -> Self {
        Self {
            inner: Arc::new(SpanInner {
                context,
                parent_span_id,
                name,
                kind,
                start_time: SystemTime::now(),
                attributes: Mutex::new(Vec::new()),
                end: OnceLock::new(),
            }),
        }
    }

    pub fn context(&self) -> TraceContext {
        self.inner.context
    }

    pub fn trace_id(&self) -> TraceId {
        self.inner.context.trace_id
    }

    pub fn span_id(&self) -> SpanId {
        self.inner.context.span_id
    }

    pub fn parent_span_id(&self) -> Option<SpanId> {
        self.inner.parent_span_id
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn kind(&self) -> SpanKind {
        self.inner.kind
    }

    pub fn start_time(&self) -> SystemTime {
        self.inner.start_time
    }

    pub fn end_time(&self) -> Option<SystemTime> {
        self.inner.end.get().map(|end| end.time)
    }

    pub fn status(&self) -> Option<SpanStatus> {
        self.inner.end.get().map(|end| end.status)
    }

    pub fn is_ended(&self) -> bool {
        self.inner.end.get().is_some()
    }

    /// Record a string attribute. Ignored once the span has ended.
    pub fn set_attribute(&self, key: impl Into<String>, value: impl Into<String>) {
        if self.is_ended() {
            return;
        }
        self.inner
            .attributes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((key.into(), value.into()));
    }

    /// True if both handles refer to the same span.
    pub fn same_as(&self, other: &Span) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Write the end marker. Returns `false` if the span had already ended.
    pub(crate) fn mark_ended(&self, status: SpanStatus) -> bool {
        self.inner
            .end
            .set(SpanEnd {
                time: SystemTime::now(),
                status,
            })
            .is_ok()
    }

    /// Snapshot for export. Only meaningful after the span ended.
    pub fn to_data(&self) -> SpanData {
        let end = self.inner.end.get().copied();
        SpanData {
            trace_id: self.trace_id(),
            span_id: self.span_id(),
            parent_span_id: self.parent_span_id(),
            sampled: self.inner.context.sampled,
            name: self.inner.name.clone(),
            kind: self.inner.kind,
            start_time: self.inner.start_time,
            end_time: end.map(|e| e.time).unwrap_or(self.inner.start_time),
            status: end.map(|e| e.status).unwrap_or(SpanStatus::Aborted),
            attributes: self
                .inner
                .attributes
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .clone(),
        }
    }
}

impl fmt::Debug for Span {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Span")
            .field("trace_id", &self.trace_id())
            .field("span_id", &self.span_id())
            .field("parent_span_id", &self.parent_span_id())
            .field("name", &self.inner.name)
            .field("ended", &self.is_ended())
            .finish()
    }
}

/// Immutable record of a completed span, handed to exporters.
#[derive(Debug, Clone, Serialize)]
pub struct SpanData {
    pub trace_id: TraceId,
    pub span_id: SpanId,
    pub parent_span_id: Option<SpanId>,
    pub sampled: bool,
    pub name: String,
    pub kind: SpanKind,
    pub start_time: SystemTime,
    pub end_time: SystemTime,
    pub status: SpanStatus,
    pub attributes: Vec<(String, String)>,
}

impl SpanData {
    pub fn duration(&self) -> std::time::Duration {
        self.end_time
            .duration_since(self.start_time)
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn span() -> Span {
        let ctx = TraceContext::new(TraceId::from_u128(7), SpanId::from_u64(9), true);
        Span::new(ctx, None, "op".into(), SpanKind::Internal)
    }

    #[test]
    fn end_marker_is_written_once() {
        let span = span();
        assert!(span.mark_ended(SpanStatus::Error));
        assert!(!span.mark_ended(SpanStatus::Ok));
        assert_eq!(span.status(), Some(SpanStatus::Error));
    }

    #[test]
    fn attributes_freeze_after_end() {
        let span = span();
        span.set_attribute("http.method", "GET");
        span.mark_ended(SpanStatus::Ok);
        span.set_attribute("late", "x");
        let data = span.to_data();
        assert_eq!(data.attributes, vec![("http.method".to_string(), "GET".to_string())]);
    }

    #[test]
    fn clones_share_state() {
        let a = span();
        let b = a.clone();
        a.mark_ended(SpanStatus::Ok);
        assert!(b.is_ended());
        assert!(a.same_as(&b));
    }
}
