//! Transport-agnostic inbound call handling.
//!
//! Per call: `Received → SpanActive → {Completed | Failed}`. The span is
//! ended exactly once on every exit path: normal return, error return,
//! cancellation, panic, or the future being dropped.

use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use thiserror::Error;
use tracing::Level;

use crate::lifecycle::ShutdownCoordinator;
use crate::observability::{metrics, LogRecord, Logger};
use crate::propagation::{self, Carrier};
use crate::telemetry::{RequestContext, Span, SpanKind, SpanStatus, SpanTracker};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum BoundaryError {
    /// The process is draining and admits no new work.
    #[error("service is shutting down")]
    Rejected,
    /// The request context was cancelled before the handler returned.
    #[error("call cancelled before completion")]
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallState {
    Received,
    SpanActive,
    Completed,
    Failed,
}

impl CallState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CallState::Received => "received",
            CallState::SpanActive => "span_active",
            CallState::Completed => "completed",
            CallState::Failed => "failed",
        }
    }
}

/// Whether a handler's output counts as a failed call.
pub trait CallOutcome {
    fn is_failure(&self) -> bool;
}

impl CallOutcome for () {
    fn is_failure(&self) -> bool {
        false
    }
}

impl<T: CallOutcome, E> CallOutcome for Result<T, E> {
    fn is_failure(&self) -> bool {
        match self {
            Ok(value) => value.is_failure(),
            Err(_) => true,
        }
    }
}

/// 5xx, or a non-zero `grpc-status` in the headers (trailers-only errors).
impl<B> CallOutcome for http::Response<B> {
    fn is_failure(&self) -> bool {
        self.status().is_server_error()
            || self
                .headers()
                .get("grpc-status")
                .is_some_and(|status| status.as_bytes() != b"0")
    }
}

/// Shared per-service boundary: admission, span lifecycle, log lines.
pub struct Boundary {
    transport: &'static str,
    tracker: Arc<SpanTracker>,
    logger: Logger,
    shutdown: ShutdownCoordinator,
}

impl Boundary {
    pub fn new(
        transport: &'static str,
        tracker: Arc<SpanTracker>,
        logger: Logger,
        shutdown: ShutdownCoordinator,
    ) -> Self {
        Self {
            transport,
            tracker,
            logger,
            shutdown,
        }
    }

    pub fn transport(&self) -> &'static str {
        self.transport
    }

    pub fn tracker(&self) -> &Arc<SpanTracker> {
        &self.tracker
    }

    pub fn logger(&self) -> &Logger {
        &self.logger
    }

    /// Fresh root context, cancelled on forced shutdown.
    pub fn root_context(&self) -> RequestContext {
        self.shutdown.request_context()
    }

    /// Run `handler` as one inbound call.
    ///
    /// The handler receives a context carrying the new span (a child of the
    /// carrier's trace context, or a fresh root). Its output is returned
    /// unchanged. Outbound propagation is left to the handler.
    pub async fn run<F, Fut, T>(
        &self,
        name: &str,
        kind: SpanKind,
        carrier: &Carrier,
        base: RequestContext,
        handler: F,
    ) -> Result<T, BoundaryError>
    where
        F: FnOnce(RequestContext) -> Fut,
        Fut: Future<Output = T>,
        T: CallOutcome,
    {
        let started = Instant::now();
        let Some(_in_flight) = self.shutdown.track() else {
            metrics::record_rejected(self.transport);
            tracing::debug!(transport = self.transport, call = name, "Rejected call while draining");
            return Err(BoundaryError::Rejected);
        };

        let extracted = propagation::decode(carrier);
        let base = if extracted.baggage.is_empty() {
            base
        } else {
            base.with_baggage(extracted.baggage)
        };
        let (span, ctx) = self.tracker.start_span_of(&base, kind, name, extracted.context);
        let mut guard = SpanGuard::new(&self.tracker, span);

        self.logger.emit(
            &ctx,
            LogRecord::new(Level::INFO, "trace start")
                .with_attr("call", name)
                .with_attr("kind", kind.as_str()),
        );

        let handler = handler(ctx.clone());
        tokio::select! {
            biased;
            output = handler => {
                let (state, status) = if output.is_failure() {
                    (CallState::Failed, SpanStatus::Error)
                } else {
                    (CallState::Completed, SpanStatus::Ok)
                };
                self.logger.emit(
                    &ctx,
                    LogRecord::new(Level::INFO, "trace done").with_attr("state", state.as_str()),
                );
                guard.finish(state, status);
                metrics::record_request(self.transport, state.as_str(), started);
                Ok(output)
            }
            _ = ctx.cancelled() => {
                self.logger.warn(&ctx, "trace aborted");
                guard.finish(CallState::Failed, SpanStatus::Aborted);
                metrics::record_request(self.transport, "cancelled", started);
                Err(BoundaryError::Cancelled)
            }
        }
    }
}

impl std::fmt::Debug for Boundary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Boundary")
            .field("transport", &self.transport)
            .finish_non_exhaustive()
    }
}

/// Ends the span when dropped unless the call already finished it.
struct SpanGuard<'a> {
    tracker: &'a SpanTracker,
    span: Span,
    state: CallState,
}

impl<'a> SpanGuard<'a> {
    fn new(tracker: &'a SpanTracker, span: Span) -> Self {
        Self {
            tracker,
            span,
            state: CallState::SpanActive,
        }
    }

    fn finish(&mut self, state: CallState, status: SpanStatus) {
        self.state = state;
        self.tracker.end_span_with(&self.span, status);
    }
}

impl Drop for SpanGuard<'_> {
    fn drop(&mut self) {
        if self.state == CallState::SpanActive {
            self.span.set_attribute("call.state", "dropped");
            self.tracker.end_span_with(&self.span, SpanStatus::Aborted);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observability::{FieldRegistry, MemorySink};
    use crate::propagation::{SpanId, TraceContext, TraceId};
    use crate::telemetry::export::MemoryExporter;
    use crate::telemetry::{BatchConfig, SpanProcessor};
    use futures_util::FutureExt;
    use std::convert::Infallible;
    use std::panic::AssertUnwindSafe;
    use std::time::Duration;

    // Lets handlers in these tests hand back the outbound carrier.
    impl CallOutcome for Carrier {
        fn is_failure(&self) -> bool {
            false
        }
    }

    async fn explode() {
        panic!("handler bug")
    }

    struct Fixture {
        boundary: Boundary,
        logs: MemorySink,
        shutdown: ShutdownCoordinator,
    }

    fn fixture() -> Fixture {
        let logs = MemorySink::new();
        let shutdown = ShutdownCoordinator::new(Duration::from_secs(5), Duration::from_secs(1));
        let boundary = Boundary::new(
            "test",
            Arc::new(SpanTracker::new()),
            Logger::enriching(logs.clone(), FieldRegistry::from_context_keys(["request_id"])),
            shutdown.clone(),
        );
        Fixture {
            boundary,
            logs,
            shutdown,
        }
    }

    #[tokio::test]
    async fn call_without_header_becomes_trace_root() {
        let f = fixture();
        let mut seen = None;

        f.boundary
            .run("op", SpanKind::Server, &Carrier::new(), RequestContext::new(), |ctx| {
                let span = ctx.span().cloned().unwrap();
                f.boundary.logger().info(&ctx, "processing");
                seen = Some(span);
                async {}
            })
            .await
            .unwrap();

        let span = seen.unwrap();
        assert!(span.trace_id().is_valid());
        assert_eq!(span.parent_span_id(), None);
        assert_eq!(span.status(), Some(SpanStatus::Ok));

        let line = &f.logs.find("processing")[0];
        assert_eq!(line.attr("trace_id").unwrap(), &span.trace_id().to_string());
        assert_eq!(line.attr("span_id").unwrap(), &span.span_id().to_string());
        assert_eq!(f.logs.find("trace start").len(), 1);
        assert_eq!(f.logs.find("trace done").len(), 1);
    }

    #[tokio::test]
    async fn call_with_header_continues_trace() {
        let f = fixture();
        let remote = TraceContext::new(TraceId::from_u128(0x2b), SpanId::from_u64(0x52), true);
        let carrier = propagation::encode(&remote, &propagation::Baggage::new());

        let outbound = f
            .boundary
            .run("op", SpanKind::Server, &carrier, RequestContext::new(), |ctx| async move {
                Ok::<_, Infallible>(ctx.outbound_carrier())
            })
            .await
            .unwrap()
            .unwrap();

        let decoded = propagation::decode(&outbound).context.unwrap();
        assert_eq!(decoded.trace_id, remote.trace_id);
        assert_ne!(decoded.span_id, remote.span_id);
    }

    #[tokio::test]
    async fn handler_error_passes_through_and_fails_span() {
        let f = fixture();
        let mut span = None;

        let result = f
            .boundary
            .run("op", SpanKind::Server, &Carrier::new(), RequestContext::new(), |ctx| {
                span = ctx.span().cloned();
                async { Err::<(), _>("boom") }
            })
            .await
            .unwrap();

        assert_eq!(result, Err("boom"));
        assert_eq!(span.unwrap().status(), Some(SpanStatus::Error));
        let done = &f.logs.find("trace done")[0];
        assert_eq!(done.attr("state").unwrap(), "failed");
    }

    #[tokio::test]
    async fn panicking_handler_still_ends_span() {
        let f = fixture();
        let mut span = None;

        let outcome = AssertUnwindSafe(f.boundary.run(
            "op",
            SpanKind::Server,
            &Carrier::new(),
            RequestContext::new(),
            |ctx| {
                span = ctx.span().cloned();
                explode()
            },
        ))
        .catch_unwind()
        .await;

        assert!(outcome.is_err());
        let span = span.unwrap();
        assert!(span.is_ended());
        assert_eq!(span.status(), Some(SpanStatus::Aborted));
        assert_eq!(f.shutdown.in_flight(), 0);
    }

    #[tokio::test]
    async fn dropped_call_ends_span() {
        let f = fixture();
        let mut span = None;

        let carrier = Carrier::new();
        let call = f.boundary.run("op", SpanKind::Server, &carrier, RequestContext::new(), |ctx| {
            span = ctx.span().cloned();
            std::future::pending::<()>()
        });
        let _ = tokio::time::timeout(Duration::from_millis(10), call).await;

        assert_eq!(span.unwrap().status(), Some(SpanStatus::Aborted));
        assert_eq!(f.shutdown.in_flight(), 0);
    }

    #[tokio::test]
    async fn cancelled_context_aborts_call() {
        let f = fixture();
        let base = f.boundary.root_context();
        let token = base.cancellation().clone();
        let mut span = None;

        let carrier = Carrier::new();
        let call = f.boundary.run("op", SpanKind::Server, &carrier, base, |ctx| {
            span = ctx.span().cloned();
            std::future::pending::<()>()
        });
        token.cancel();

        assert_eq!(call.await, Err(BoundaryError::Cancelled));
        assert_eq!(span.unwrap().status(), Some(SpanStatus::Aborted));
        assert_eq!(f.logs.find("trace aborted").len(), 1);
    }

    #[tokio::test]
    async fn draining_rejects_without_starting_span() {
        let f = fixture();
        let shutdown = f.shutdown.clone();
        let handle = tokio::spawn(async move { shutdown.shutdown().await });
        f.shutdown.draining().cancelled().await;

        let mut invoked = false;
        let result = f
            .boundary
            .run("op", SpanKind::Server, &Carrier::new(), RequestContext::new(), |_| {
                invoked = true;
                async {}
            })
            .await;

        assert_eq!(result, Err(BoundaryError::Rejected));
        assert!(!invoked);
        assert!(f.logs.records().is_empty());
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn sampled_spans_are_exported_once() {
        let exporter = MemoryExporter::new();
        let processor = SpanProcessor::spawn(Arc::new(exporter.clone()), BatchConfig::default());
        let shutdown = ShutdownCoordinator::new(Duration::from_secs(5), Duration::from_secs(1));
        let boundary = Boundary::new(
            "test",
            Arc::new(SpanTracker::new().with_export_queue(processor.queue())),
            Logger::enriching(MemorySink::new(), FieldRegistry::default()),
            shutdown,
        );

        for _ in 0..3 {
            boundary
                .run("op", SpanKind::Server, &Carrier::new(), RequestContext::new(), |_| async {})
                .await
                .unwrap();
        }
        processor.shutdown().await.unwrap();

        let spans = exporter.spans();
        assert_eq!(spans.len(), 3);
        let ids: std::collections::HashSet<_> = spans.iter().map(|s| s.span_id).collect();
        assert_eq!(ids.len(), 3);
    }
}
