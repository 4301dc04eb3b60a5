//! Trace and span identifiers.

use std::fmt;

use serde::{Serialize, Serializer};

/// 128-bit trace identifier shared by every span of one logical request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct TraceId(u128);

impl TraceId {
    /// The all-zero sentinel. Never a valid propagated id.
    pub const INVALID: TraceId = TraceId(0);

    pub const fn from_u128(raw: u128) -> Self {
        Self(raw)
    }

    pub const fn to_u128(self) -> u128 {
        self.0
    }

    pub fn is_valid(&self) -> bool {
        self.0 != 0
    }

    pub fn to_bytes(self) -> [u8; 16] {
        self.0.to_be_bytes()
    }

    /// Parse exactly 32 lowercase hex characters.
    pub fn from_hex(s: &str) -> Option<Self> {
        let mut buf = [0u8; 16];
        decode_lower_hex(s, &mut buf)?;
        Some(Self(u128::from_be_bytes(buf)))
    }
}

impl fmt::Display for TraceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:032x}", self.0)
    }
}

impl Serialize for TraceId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// 64-bit span identifier, unique per unit of work within a trace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct SpanId(u64);

impl SpanId {
    /// The all-zero sentinel.
    pub const INVALID: SpanId = SpanId(0);

    pub const fn from_u64(raw: u64) -> Self {
        Self(raw)
    }

    pub const fn to_u64(self) -> u64 {
        self.0
    }

    pub fn is_valid(&self) -> bool {
        self.0 != 0
    }

    pub fn to_bytes(self) -> [u8; 8] {
        self.0.to_be_bytes()
    }

    /// Parse exactly 16 lowercase hex characters.
    pub fn from_hex(s: &str) -> Option<Self> {
        let mut buf = [0u8; 8];
        decode_lower_hex(s, &mut buf)?;
        Some(Self(u64::from_be_bytes(buf)))
    }
}

impl fmt::Display for SpanId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

impl Serialize for SpanId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Identity of one span as it travels across process boundaries.
///
/// Immutable once created: a child span gets a new `TraceContext`, it never
/// rewrites its parent's.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct TraceContext {
    pub trace_id: TraceId,
    pub span_id: SpanId,
    pub sampled: bool,
}

impl TraceContext {
    pub const fn new(trace_id: TraceId, span_id: SpanId, sampled: bool) -> Self {
        Self {
            trace_id,
            span_id,
            sampled,
        }
    }

    /// Both ids non-zero.
    pub fn is_valid(&self) -> bool {
        self.trace_id.is_valid() && self.span_id.is_valid()
    }
}

fn decode_lower_hex(s: &str, out: &mut [u8]) -> Option<()> {
    if s.len() != out.len() * 2 || !s.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f')) {
        return None;
    }
    hex::decode_to_slice(s, out).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_is_zero_padded_lowercase() {
        assert_eq!(TraceId::from_u128(0xab).to_string(), format!("{:0>32}", "ab"));
        assert_eq!(SpanId::from_u64(0xAB).to_string(), "00000000000000ab");
        assert_eq!(TraceId::INVALID.to_string(), "0".repeat(32));
    }

    #[test]
    fn from_hex_rejects_uppercase_and_wrong_length() {
        assert!(TraceId::from_hex("4BF92F3577B34DA6A3CE929D0E0E4736").is_none());
        assert!(TraceId::from_hex("4bf92f3577b34da6a3ce929d0e0e473").is_none());
        assert!(SpanId::from_hex("+0f067aa0ba902b7").is_none());
        assert_eq!(
            SpanId::from_hex("00f067aa0ba902b7"),
            Some(SpanId::from_u64(0x00f0_67aa_0ba9_02b7))
        );
    }

    #[test]
    fn serializes_as_hex_string() {
        let json = serde_json::to_value(SpanId::from_u64(1)).unwrap();
        assert_eq!(json, serde_json::json!("0000000000000001"));
    }
}
