//! Trace and span id generation.

use std::sync::atomic::{AtomicU64, Ordering};

use rand::Rng;

use crate::propagation::{SpanId, TraceId};

/// Source of fresh ids. `None` means the generator is exhausted; callers
/// fall back to the zero sentinel for that one call.
pub trait IdGenerator: Send + Sync + std::fmt::Debug {
    fn trace_id(&self) -> Option<TraceId>;
    fn span_id(&self) -> Option<SpanId>;
}

/// Thread-local CSPRNG ids. Zero is redrawn.
#[derive(Debug, Default, Clone, Copy)]
pub struct RandomIdGenerator;

impl IdGenerator for RandomIdGenerator {
    fn trace_id(&self) -> Option<TraceId> {
        let mut rng = rand::thread_rng();
        loop {
            let id = TraceId::from_u128(rng.gen());
            if id.is_valid() {
                return Some(id);
            }
        }
    }

    fn span_id(&self) -> Option<SpanId> {
        let mut rng = rand::thread_rng();
        loop {
            let id = SpanId::from_u64(rng.gen());
            if id.is_valid() {
                return Some(id);
            }
        }
    }
}

/// Counter plus a per-process salt.
///
/// Span ids are `counter ^ salt`, a bijection of the counter, so they stay
/// unique until the counter wraps. At that point the generator reports
/// exhaustion instead of reusing ids.
#[derive(Debug)]
pub struct SequentialIdGenerator {
    salt: u64,
    counter: AtomicU64,
}

impl SequentialIdGenerator {
    pub fn new(salt: u64) -> Self {
        Self::starting_at(salt, 1)
    }

    /// Salt drawn at random, so two processes are unlikely to collide.
    pub fn with_random_salt() -> Self {
        Self::new(rand::thread_rng().gen())
    }

    pub(crate) fn starting_at(salt: u64, first: u64) -> Self {
        Self {
            salt,
            counter: AtomicU64::new(first),
        }
    }

    fn next(&self) -> Option<u64> {
        self.counter
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| n.checked_add(1))
            .ok()
    }
}

impl IdGenerator for SequentialIdGenerator {
    fn trace_id(&self) -> Option<TraceId> {
        let n = self.next()?;
        Some(TraceId::from_u128((u128::from(self.salt) << 64) | u128::from(n)))
            .filter(TraceId::is_valid)
    }

    fn span_id(&self) -> Option<SpanId> {
        let n = self.next()?;
        Some(SpanId::from_u64(n ^ self.salt)).filter(SpanId::is_valid)
    }
}
