//! Sampling decisions.
//!
//! A sampler only decides whether a completed span is exported. Spans and
//! their ids are created regardless, so log correlation never depends on it.

use std::fmt;
use std::sync::{Mutex, PoisonError};
use std::time::Instant;

use crate::propagation::{TraceContext, TraceId};

pub trait Sampler: Send + Sync + fmt::Debug {
    /// Decide for a span about to start in `trace_id`, with its parent if any.
    fn should_sample(&self, trace_id: TraceId, parent: Option<&TraceContext>) -> bool;
}

impl<S: Sampler + ?Sized> Sampler for Box<S> {
    fn should_sample(&self, trace_id: TraceId, parent: Option<&TraceContext>) -> bool {
        (**self).should_sample(trace_id, parent)
    }
}

/// Records every span.
#[derive(Debug, Default, Clone, Copy)]
pub struct AlwaysSample;

impl Sampler for AlwaysSample {
    fn should_sample(&self, _trace_id: TraceId, _parent: Option<&TraceContext>) -> bool {
        true
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NeverSample;

impl Sampler for NeverSample {
    fn should_sample(&self, _trace_id: TraceId, _parent: Option<&TraceContext>) -> bool {
        false
    }
}

/// Samples a fixed fraction of traces, decided from the trace id alone so
/// that every process in the trace agrees.
#[derive(Debug, Clone, Copy)]
pub struct TraceIdRatio {
    threshold: u64,
}

impl TraceIdRatio {
    pub fn new(ratio: f64) -> Self {
        let ratio = if ratio.is_nan() { 0.0 } else { ratio.clamp(0.0, 1.0) };
        Self {
            threshold: (ratio * (1u64 << 63) as f64) as u64,
        }
    }
}

impl Sampler for TraceIdRatio {
    fn should_sample(&self, trace_id: TraceId, _parent: Option<&TraceContext>) -> bool {
        ((trace_id.to_u128() as u64) >> 1) < self.threshold
    }
}

/// Defers to the remote parent's decision when there is one.
#[derive(Debug)]
pub struct ParentBased<S> {
    root: S,
}

impl<S: Sampler> ParentBased<S> {
    pub fn new(root: S) -> Self {
        Self { root }
    }
}

impl<S: Sampler> Sampler for ParentBased<S> {
    fn should_sample(&self, trace_id: TraceId, parent: Option<&TraceContext>) -> bool {
        match parent {
            Some(parent) => parent.sampled,
            None => self.root.should_sample(trace_id, None),
        }
    }
}

#[derive(Debug)]
struct TokenBucket {
    tokens: f64,
    last_update: Instant,
}

/// Samples at most `per_second` spans per second, with a burst of the same size.
#[derive(Debug)]
pub struct RateLimited {
    per_second: f64,
    bucket: Mutex<TokenBucket>,
}

impl RateLimited {
    pub fn new(per_second: f64) -> Self {
        let per_second = per_second.max(0.0);
        Self {
            per_second,
            bucket: Mutex::new(TokenBucket {
                tokens: per_second,
                last_update: Instant::now(),
            }),
        }
    }
}

impl Sampler for RateLimited {
    fn should_sample(&self, _trace_id: TraceId, _parent: Option<&TraceContext>) -> bool {
        let mut bucket = self.bucket.lock().unwrap_or_else(PoisonError::into_inner);
        let now = Instant::now();
        let elapsed = now.duration_since(bucket.last_update).as_secs_f64();
        bucket.tokens = (bucket.tokens + elapsed * self.per_second).min(self.per_second);
        bucket.last_update = now;

        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            true
        } else {
            false
        }
    }
}
