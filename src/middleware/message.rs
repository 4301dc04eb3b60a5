//! Boundary adapter for one-shot message deliveries.
//!
//! The message attributes are the carrier; the acknowledgement is the
//! response.

use std::collections::HashMap;
use std::fmt::Display;
use std::future::Future;

use crate::middleware::boundary::{Boundary, BoundaryError};
use crate::observability::LogRecord;
use crate::propagation::Carrier;
use crate::telemetry::{RequestContext, SpanKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NackReason {
    HandlerFailed,
    Draining,
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Acknowledgement {
    Ack,
    Nack(NackReason),
}

impl Acknowledgement {
    pub fn is_ack(&self) -> bool {
        matches!(self, Acknowledgement::Ack)
    }
}

/// Run `handler` for one delivery and decide how to acknowledge it.
pub async fn deliver<F, Fut, E>(
    boundary: &Boundary,
    name: &str,
    message_id: &str,
    attributes: &HashMap<String, String>,
    handler: F,
) -> Acknowledgement
where
    F: FnOnce(RequestContext) -> Fut,
    Fut: Future<Output = Result<(), E>>,
    E: Display,
{
    let carrier = Carrier::from_attributes(attributes);
    let base = boundary.root_context().with_field("message_id", message_id);
    let logger = boundary.logger();

    let outcome = boundary
        .run(name, SpanKind::Consumer, &carrier, base, |ctx| async move {
            let result = handler(ctx.clone()).await;
            if let Err(e) = &result {
                logger.emit(
                    &ctx,
                    LogRecord::new(tracing::Level::ERROR, "message handler failed")
                        .with_attr("error", e.to_string()),
                );
            }
            result
        })
        .await;

    match outcome {
        Ok(Ok(())) => Acknowledgement::Ack,
        Ok(Err(_)) => Acknowledgement::Nack(NackReason::HandlerFailed),
        Err(BoundaryError::Rejected) => Acknowledgement::Nack(NackReason::Draining),
        Err(BoundaryError::Cancelled) => Acknowledgement::Nack(NackReason::Cancelled),
    }
}
