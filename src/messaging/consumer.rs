//! Push consumer.
//!
//! `POST /push` receives one delivery. 204 acknowledges it; 500 (handler
//! failure) and 503 (draining, cancelled) ask for redelivery.

use std::sync::Arc;

use async_trait::async_trait;
use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::post;
use axum::{Json, Router};
use tower_http::catch_panic::CatchPanicLayer;

use crate::lifecycle::BoxError;
use crate::messaging::message::{PushEnvelope, PushMessage};
use crate::middleware::{deliver, Acknowledgement, Boundary, NackReason};
use crate::observability::Logger;
use crate::telemetry::RequestContext;

pub const PUSH_PATH: &str = "/push";

#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle(&self, ctx: &RequestContext, message: &PushMessage) -> Result<(), BoxError>;
}

/// Logs each payload as `received message: <payload>`.
#[derive(Debug, Clone)]
pub struct LogMessages {
    logger: Logger,
}

impl LogMessages {
    pub fn new(logger: Logger) -> Self {
        Self { logger }
    }
}

#[async_trait]
impl MessageHandler for LogMessages {
    async fn handle(&self, ctx: &RequestContext, message: &PushMessage) -> Result<(), BoxError> {
        let payload = message.payload()?;
        self.logger.info(
            ctx,
            format!("received message: {}", String::from_utf8_lossy(&payload)),
        );
        Ok(())
    }
}

#[derive(Clone)]
struct ConsumerState {
    boundary: Arc<Boundary>,
    handler: Arc<dyn MessageHandler>,
}

pub fn router(boundary: Arc<Boundary>, handler: Arc<dyn MessageHandler>) -> Router {
    Router::new()
        .route(PUSH_PATH, post(push))
        .with_state(ConsumerState { boundary, handler })
        .layer(CatchPanicLayer::new())
}

async fn push(State(state): State<ConsumerState>, Json(envelope): Json<PushEnvelope>) -> StatusCode {
    let message = &envelope.message;
    let handler = state.handler.clone();

    let ack = deliver(
        &state.boundary,
        &envelope.subscription,
        &message.message_id,
        &message.attributes,
        |ctx| async move { handler.handle(&ctx, message).await },
    )
    .await;

    match ack {
        Acknowledgement::Ack => StatusCode::NO_CONTENT,
        Acknowledgement::Nack(NackReason::HandlerFailed) => StatusCode::INTERNAL_SERVER_ERROR,
        Acknowledgement::Nack(NackReason::Draining | NackReason::Cancelled) => {
            StatusCode::SERVICE_UNAVAILABLE
        }
    }
}
