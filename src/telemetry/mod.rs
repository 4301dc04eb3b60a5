//! Span tracking subsystem.
//!
//! # Data Flow
//! ```text
//! Boundary middleware
//!     → tracker.rs start_span (ids.rs, sampler.rs)
//!     → context.rs RequestContext carries the span down the call chain
//!     → tracker.rs end_span
//!     → processor.rs bounded queue (sampled spans only)
//!     → export.rs exporter on the drain task
//! ```
//!
//! # Design Decisions
//! - Context is an explicit value, never thread-local or task-local
//! - Sampling affects export only; ids always exist for log correlation
//! - Ending a span twice is a no-op
//! - Export is fire-and-forget; a full queue drops spans instead of blocking

pub mod context;
pub mod export;
pub mod ids;
pub mod processor;
pub mod sampler;
pub mod span;
pub mod tracker;

pub use context::RequestContext;
pub use export::{ExportError, SpanExporter};
pub use processor::{BatchConfig, SpanProcessor, SpanQueue};
pub use sampler::Sampler;
pub use span::{Span, SpanData, SpanKind, SpanStatus};
pub use tracker::SpanTracker;
