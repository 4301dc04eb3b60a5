//! API front door: `GET /health`.
//!
//! The check fans out to both peers on behalf of the inbound trace: an RPC
//! health check, then a published "health check" message.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use thiserror::Error;
use tracing::Level;
use tonic_health::pb::health_check_response::ServingStatus;

use crate::messaging::{PublishError, Publisher};
use crate::middleware::{Boundary, Traced};
use crate::observability::{LogRecord, Logger};
use crate::rpc::RpcClient;
use crate::telemetry::RequestContext;

pub const HEALTH_PATH: &str = "/health";

#[derive(Clone)]
pub struct ApiState {
    pub rpc: RpcClient,
    pub publisher: Publisher,
    pub logger: Logger,
}

#[derive(Debug, Error)]
pub enum HealthError {
    #[error("rpc health check failed: {0}")]
    Rpc(#[from] tonic::Status),
    #[error("rpc peer is {0}")]
    NotServing(&'static str),
    #[error(transparent)]
    Publish(#[from] PublishError),
}

impl HealthError {
    /// Whether a peer is down, as opposed to a fault in this service.
    pub fn is_dependency_failure(&self) -> bool {
        match self {
            HealthError::Rpc(_) | HealthError::NotServing(_) => true,
            HealthError::Publish(e) => e.is_dependency_failure(),
        }
    }

    pub fn kind(&self) -> &'static str {
        if self.is_dependency_failure() {
            "dependency_unavailable"
        } else {
            "internal"
        }
    }

    pub fn status(&self) -> StatusCode {
        if self.is_dependency_failure() {
            StatusCode::SERVICE_UNAVAILABLE
        } else {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

/// Failed check plus the context it failed in, so the failure line is
/// logged against the request's trace.
pub struct HealthFailure {
    error: HealthError,
    ctx: RequestContext,
    logger: Logger,
}

impl IntoResponse for HealthFailure {
    fn into_response(self) -> Response {
        let record = LogRecord::new(Level::ERROR, "health check failed")
            .with_attr("kind", self.error.kind())
            .with_attr("error", self.error.to_string());
        self.logger.emit(&self.ctx, record);
        (self.error.status(), self.error.kind()).into_response()
    }
}

pub fn router(state: ApiState) -> Router {
    Router::new()
        .route(HEALTH_PATH, get(health))
        .with_state(state)
}

/// The API router inside the traced middleware stack.
pub fn app(state: ApiState, boundary: Arc<Boundary>, request_timeout: Duration) -> Router {
    super::server::traced(router(state), boundary, request_timeout)
}

async fn health(State(state): State<ApiState>, Traced(ctx): Traced) -> Result<&'static str, HealthFailure> {
    state.logger.info(&ctx, "api health check");

    let checked = check_peers(&state, &ctx).await;
    state.logger.info(&ctx, "api health check done");

    checked.map_err(|error| HealthFailure {
        error,
        ctx,
        logger: state.logger.clone(),
    })?;

    Ok("OK")
}

async fn check_peers(state: &ApiState, ctx: &RequestContext) -> Result<(), HealthError> {
    let status = state.rpc.check(ctx, "").await?;
    if status != ServingStatus::Serving {
        return Err(HealthError::NotServing(status.as_str_name()));
    }

    let message_id = state.publisher.publish(ctx, b"health check").await?;
    state.logger.debug(ctx, format!("published health check {message_id}"));
    Ok(())
}
