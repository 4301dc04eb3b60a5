//! Tower layer running every HTTP or gRPC request through a [`Boundary`].
//!
//! Works for both axum and tonic, since tonic's transport metadata is the
//! HTTP/2 header map. The handler finds its [`RequestContext`] in the
//! request extensions.

use std::convert::Infallible;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use axum::extract::FromRequestParts;
use axum::response::IntoResponse;
use http::request::Parts;
use http::{Request, StatusCode};
use tower::{Layer, Service};

use crate::middleware::boundary::{Boundary, BoundaryError};
use crate::propagation::Carrier;
use crate::telemetry::{RequestContext, SpanKind};

pub const X_REQUEST_ID: &str = "x-request-id";

/// Response produced when the boundary refuses or aborts a call.
pub trait RejectResponse: Sized {
    fn from_boundary_error(error: BoundaryError) -> Self;
}

impl RejectResponse for http::Response<axum::body::Body> {
    fn from_boundary_error(error: BoundaryError) -> Self {
        (StatusCode::SERVICE_UNAVAILABLE, error.to_string()).into_response()
    }
}

impl RejectResponse for http::Response<tonic::body::Body> {
    fn from_boundary_error(error: BoundaryError) -> Self {
        tonic::Status::unavailable(error.to_string()).into_http()
    }
}

#[derive(Clone)]
pub struct BoundaryLayer {
    boundary: Arc<Boundary>,
}

impl BoundaryLayer {
    pub fn new(boundary: Arc<Boundary>) -> Self {
        Self { boundary }
    }
}

impl<S> Layer<S> for BoundaryLayer {
    type Service = BoundaryService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        BoundaryService {
            inner,
            boundary: self.boundary.clone(),
        }
    }
}

#[derive(Clone)]
pub struct BoundaryService<S> {
    inner: S,
    boundary: Arc<Boundary>,
}

type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send + 'static>>;

impl<S, ReqBody, ResBody> Service<Request<ReqBody>> for BoundaryService<S>
where
    S: Service<Request<ReqBody>, Response = http::Response<ResBody>> + Clone + Send + 'static,
    S::Future: Send + 'static,
    S::Error: Send + 'static,
    ReqBody: Send + 'static,
    ResBody: Send + 'static,
    http::Response<ResBody>: RejectResponse,
{
    type Response = http::Response<ResBody>;
    type Error = S::Error;
    type Future = BoxFuture<Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, mut request: Request<ReqBody>) -> Self::Future {
        // The clone may not be ready; keep the one that was polled.
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);
        let boundary = self.boundary.clone();

        Box::pin(async move {
            let carrier = Carrier::from_headers(request.headers());
            let name = call_name(boundary.transport(), &request);
            let mut base = boundary.root_context();
            if let Some(id) = request
                .headers()
                .get(X_REQUEST_ID)
                .and_then(|v| v.to_str().ok())
            {
                base = base.with_field("request_id", id);
            }

            let outcome = boundary
                .run(&name, SpanKind::Server, &carrier, base, |ctx| {
                    request.extensions_mut().insert(ctx);
                    inner.call(request)
                })
                .await;

            match outcome {
                Ok(result) => result,
                Err(error) => Ok(http::Response::<ResBody>::from_boundary_error(error)),
            }
        })
    }
}

/// gRPC calls are named by method path; HTTP calls by method and path.
fn call_name<B>(transport: &str, request: &Request<B>) -> String {
    if transport == "rpc" {
        request.uri().path().to_string()
    } else {
        format!("{} {}", request.method(), request.uri().path())
    }
}

/// Axum extractor for the context installed by [`BoundaryLayer`].
///
/// Falls back to an empty context when the layer is absent.
#[derive(Debug, Clone)]
pub struct Traced(pub RequestContext);

impl<S: Send + Sync> FromRequestParts<S> for Traced {
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(Traced(
            parts
                .extensions
                .get::<RequestContext>()
                .cloned()
                .unwrap_or_default(),
        ))
    }
}

impl From<Traced> for RequestContext {
    fn from(traced: Traced) -> Self {
        traced.0
    }
}
