//! `traceparent` header text format: `version-traceid-spanid-flags`.

use super::context::{SpanId, TraceContext, TraceId};

/// The only version this codec emits or accepts.
pub const SUPPORTED_VERSION: &str = "00";

const FLAG_SAMPLED: u8 = 0x01;

/// Render a context as a `traceparent` value.
pub fn format(context: &TraceContext) -> String {
    let flags = if context.sampled { FLAG_SAMPLED } else { 0 };
    format!(
        "{}-{}-{}-{:02x}",
        SUPPORTED_VERSION, context.trace_id, context.span_id, flags
    )
}

/// Parse a `traceparent` value.
///
/// Returns `None` for anything other than a well-formed version `00` header
/// with non-zero ids. Unknown flag bits are ignored.
pub fn parse(value: &str) -> Option<TraceContext> {
    let mut fields = value.trim().split('-');
    let version = fields.next()?;
    let trace_id = fields.next()?;
    let span_id = fields.next()?;
    let flags = fields.next()?;
    if fields.next().is_some() || version != SUPPORTED_VERSION {
        return None;
    }

    let trace_id = TraceId::from_hex(trace_id).filter(TraceId::is_valid)?;
    let span_id = SpanId::from_hex(span_id).filter(SpanId::is_valid)?;
    let flags = parse_flags(flags)?;

    Some(TraceContext::new(trace_id, span_id, flags & FLAG_SAMPLED != 0))
}

fn parse_flags(s: &str) -> Option<u8> {
    if s.len() != 2 || !s.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f')) {
        return None;
    }
    u8::from_str_radix(s, 16).ok()
}
