//! HTTP server setup.
//!
//! # Responsibilities
//! - Wrap a router in the traced middleware stack
//! - Bind the router to a listener
//! - Stop accepting when draining begins, then let open requests finish

use std::sync::Arc;
use std::time::Duration;

use axum::http::StatusCode;
use axum::Router;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::timeout::TimeoutLayer;

use crate::lifecycle::BoxError;
use crate::middleware::{Boundary, BoundaryLayer};

/// Apply the inbound stack, outermost first: panic capture, request id,
/// trace boundary, then the request timeout.
pub fn traced(router: Router, boundary: Arc<Boundary>, request_timeout: Duration) -> Router {
    router
        .layer(TimeoutLayer::with_status_code(
            StatusCode::REQUEST_TIMEOUT,
            request_timeout,
        ))
        .layer(BoundaryLayer::new(boundary))
        .layer(PropagateRequestIdLayer::x_request_id())
        .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
        .layer(CatchPanicLayer::new())
}

pub struct HttpServer {
    name: &'static str,
    router: Router,
}

impl HttpServer {
    pub fn new(name: &'static str, router: Router) -> Self {
        Self { name, router }
    }

    /// Serve until `draining` is cancelled and open connections finish.
    pub async fn run(self, listener: TcpListener, draining: CancellationToken) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(server = self.name, address = %addr, "HTTP server starting");

        axum::serve(listener, self.router)
            .with_graceful_shutdown(async move { draining.cancelled().await })
            .await?;

        tracing::info!(server = self.name, "HTTP server stopped");
        Ok(())
    }

    pub fn spawn(self, listener: TcpListener, draining: CancellationToken) -> JoinHandle<Result<(), BoxError>> {
        tokio::spawn(async move { self.run(listener, draining).await.map_err(BoxError::from) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lifecycle::ShutdownCoordinator;
    use crate::middleware::{Traced, X_REQUEST_ID};
    use crate::observability::{FieldRegistry, Logger, MemorySink};
    use crate::telemetry::SpanTracker;
    use axum::body::Body;
    use axum::routing::get;
    use http::Request;
    use tower::ServiceExt;

    async fn explode() -> &'static str {
        panic!("handler bug")
    }

    fn boundary(logs: &MemorySink) -> Arc<Boundary> {
        Arc::new(Boundary::new(
            "http",
            Arc::new(SpanTracker::new()),
            Logger::enriching(logs.clone(), FieldRegistry::from_context_keys(["request_id"])),
            ShutdownCoordinator::new(Duration::from_secs(5), Duration::from_secs(1)),
        ))
    }

    #[tokio::test]
    async fn generated_request_id_is_echoed_and_logged() {
        let logs = MemorySink::new();
        let app = traced(
            Router::new().route("/", get(|Traced(_ctx): Traced| async { "ok" })),
            boundary(&logs),
            Duration::from_secs(5),
        );

        let response = app
            .oneshot(Request::get("/").body(Body::empty()).unwrap())
            .await
            .unwrap();

        let echoed = response.headers().get(X_REQUEST_ID).unwrap().to_str().unwrap().to_string();
        assert_eq!(response.status(), StatusCode::OK);
        let start = &logs.find("trace start")[0];
        assert_eq!(start.attr("request_id").unwrap(), &echoed);
    }

    #[tokio::test]
    async fn panicking_handler_becomes_500_and_ends_span() {
        let logs = MemorySink::new();
        let app = traced(
            Router::new().route("/", get(explode)),
            boundary(&logs),
            Duration::from_secs(5),
        );

        let response = app
            .oneshot(Request::get("/").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(logs.find("trace start").len(), 1);
        assert!(logs.find("trace done").is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn slow_handler_times_out() {
        let logs = MemorySink::new();
        let app = traced(
            Router::new().route(
                "/",
                get(|| async {
                    tokio::time::sleep(Duration::from_secs(60)).await;
                    "late"
                }),
            ),
            boundary(&logs),
            Duration::from_secs(1),
        );

        let response = app
            .oneshot(Request::get("/").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::REQUEST_TIMEOUT);
    }
}
