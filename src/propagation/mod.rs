//! Trace context propagation (carrier codec).
//!
//! # Data Flow
//! ```text
//! Inbound:
//!     transport metadata (HTTP headers / gRPC metadata / message attributes)
//!     → carrier.rs (flat lowercase key/value view)
//!     → decode() → Option<TraceContext> + Baggage
//!
//! Outbound:
//!     current span's TraceContext + request Baggage
//!     → encode() → Carrier
//!     → attached to the outbound call by the caller
//! ```
//!
//! # Design Decisions
//! - W3C trace-context text format (`traceparent`) and W3C baggage
//! - Decoding never fails: malformed input means "no parent"
//! - Pure functions, no global propagator registry

pub mod baggage;
pub mod carrier;
pub mod context;
pub mod traceparent;

pub use baggage::Baggage;
pub use carrier::Carrier;
pub use context::{SpanId, TraceContext, TraceId};

/// Header carrying the trace context.
pub const TRACEPARENT_HEADER: &str = "traceparent";

/// Header carrying baggage.
pub const BAGGAGE_HEADER: &str = "baggage";

/// Result of decoding a carrier.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Extracted {
    /// Remote parent, absent when the header is missing or malformed.
    pub context: Option<TraceContext>,
    pub baggage: Baggage,
}

/// Encode a context and baggage into a fresh carrier.
///
/// A context with a zero id is not written, since no peer would accept it.
pub fn encode(context: &TraceContext, baggage: &Baggage) -> Carrier {
    let mut carrier = Carrier::new();
    inject(context, baggage, &mut carrier);
    carrier
}

/// Encode into an existing carrier, overwriting the propagation headers.
pub fn inject(context: &TraceContext, baggage: &Baggage, carrier: &mut Carrier) {
    if context.is_valid() {
        carrier.insert(TRACEPARENT_HEADER, traceparent::format(context));
    }
    if let Some(header) = baggage.to_header() {
        carrier.insert(BAGGAGE_HEADER, header);
    }
}

/// Decode a carrier. Pure; never fails.
pub fn decode(carrier: &Carrier) -> Extracted {
    let context = carrier.get(TRACEPARENT_HEADER).and_then(traceparent::parse);
    let baggage = carrier
        .get(BAGGAGE_HEADER)
        .map(Baggage::parse)
        .unwrap_or_default();
    Extracted { context, baggage }
}
