//! Span tracker: starts and ends spans, assigns ids, answers "current span".

use std::sync::Arc;

use arc_swap::ArcSwap;

use crate::observability::metrics;
use crate::propagation::{SpanId, TraceContext, TraceId};
use crate::telemetry::context::RequestContext;
use crate::telemetry::ids::{IdGenerator, RandomIdGenerator};
use crate::telemetry::processor::SpanQueue;
use crate::telemetry::sampler::{AlwaysSample, Sampler};
use crate::telemetry::span::{Span, SpanKind, SpanStatus};

type SharedSampler = Box<dyn Sampler>;

/// Process-wide span registry.
///
/// Id generation is lock-free, the sampler sits behind an `ArcSwap` so it can
/// be replaced at runtime, and the export queue never blocks. None of the
/// operations take a global lock.
pub struct SpanTracker {
    ids: Box<dyn IdGenerator>,
    sampler: ArcSwap<SharedSampler>,
    export: Option<SpanQueue>,
}

impl SpanTracker {
    /// Random ids, always-sample, no export.
    pub fn new() -> Self {
        Self {
            ids: Box::new(RandomIdGenerator),
            sampler: ArcSwap::from_pointee(Box::new(AlwaysSample) as SharedSampler),
            export: None,
        }
    }

    pub fn with_id_generator(mut self, ids: impl IdGenerator + 'static) -> Self {
        self.ids = Box::new(ids);
        self
    }

    pub fn with_sampler(self, sampler: impl Sampler + 'static) -> Self {
        self.set_sampler(sampler);
        self
    }

    pub fn with_export_queue(mut self, queue: SpanQueue) -> Self {
        self.export = Some(queue);
        self
    }

    /// Replace the sampler for spans started from now on.
    pub fn set_sampler(&self, sampler: impl Sampler + 'static) {
        self.sampler.store(Arc::new(Box::new(sampler)));
    }

    /// Start an internal span. See [`start_span_of`](Self::start_span_of).
    pub fn start_span(
        &self,
        ctx: &RequestContext,
        name: impl Into<String>,
        parent: Option<TraceContext>,
    ) -> (Span, RequestContext) {
        self.start_span_of(ctx, SpanKind::Internal, name, parent)
    }

    /// Start a span and bind it as current in a context derived from `ctx`.
    ///
    /// With a parent the trace id is inherited and the parent's span id
    /// becomes `parent_span_id`; without one this span is a trace root.
    /// Id exhaustion degrades to the zero sentinel for this span only.
    pub fn start_span_of(
        &self,
        ctx: &RequestContext,
        kind: SpanKind,
        name: impl Into<String>,
        parent: Option<TraceContext>,
    ) -> (Span, RequestContext) {
        let trace_id = match parent {
            Some(parent) => parent.trace_id,
            None => self.ids.trace_id().unwrap_or_else(|| {
                tracing::error!("Trace id generation failed, using sentinel");
                TraceId::INVALID
            }),
        };
        let span_id = self.ids.span_id().unwrap_or_else(|| {
            tracing::error!(%trace_id, "Span id generation failed, using sentinel");
            SpanId::INVALID
        });
        let sampled = self.sampler.load().should_sample(trace_id, parent.as_ref());

        let span = Span::new(
            TraceContext::new(trace_id, span_id, sampled),
            parent.map(|p| p.span_id),
            name.into(),
            kind,
        );
        metrics::record_span_started();

        let derived = ctx.with_span(span.clone());
        (span, derived)
    }

    /// End a span with status `Ok`.
    pub fn end_span(&self, span: &Span) -> bool {
        self.end_span_with(span, SpanStatus::Ok)
    }

    /// End a span. Ending an already-ended span does nothing and returns
    /// `false`. Sampled spans are queued for export on their first end.
    pub fn end_span_with(&self, span: &Span, status: SpanStatus) -> bool {
        if !span.mark_ended(status) {
            return false;
        }
        metrics::record_span_ended(status.as_str());
        if span.context().sampled {
            if let Some(queue) = &self.export {
                queue.submit(span.to_data());
            }
        }
        true
    }

    /// Active span of `ctx`. Pure lookup.
    pub fn current(&self, ctx: &RequestContext) -> Option<Span> {
        ctx.span().cloned()
    }
}

impl Default for SpanTracker {
    fn default() -> Self {
        Self::new()
    }
}
