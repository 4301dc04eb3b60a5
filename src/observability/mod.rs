//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! Request-scoped logs:
//!     handler → logger.rs (Logger, with RequestContext)
//!     → enrich.rs (trace_id, span_id, registered fields)
//!     → sink.rs base sink (JSON lines / tracing / memory)
//!
//! Process-level logs:
//!     tracing macros → logging.rs subscriber (EnvFilter + fmt)
//!
//! Metrics:
//!     → metrics.rs (counters, gauges, histograms)
//!     → Prometheus scrape endpoint (optional)
//! ```
//!
//! # Design Decisions
//! - Structured logging (JSON) for machine parsing
//! - Enrichment wraps a base sink; it never formats or filters
//! - Logging never returns an error to business code
//! - Metrics are cheap (no-ops without a recorder)

pub mod enrich;
pub mod logger;
pub mod logging;
pub mod metrics;
pub mod sink;

pub use enrich::{ContextSink, EnrichingSink, FieldRegistry};
pub use logger::Logger;
pub use sink::{JsonSink, LogRecord, LogSink, MemorySink, SinkError, TracingSink};
