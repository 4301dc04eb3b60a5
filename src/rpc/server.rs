//! gRPC server hosting the standard health-checking service.
//!
//! The boundary layer sits in front of every method, so each call gets a
//! server span continuing the caller's trace from the request metadata.

use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tonic::transport::server::TcpIncoming;
use tonic::transport::Server;
use tonic_health::ServingStatus;

use crate::lifecycle::BoxError;
use crate::middleware::{Boundary, BoundaryLayer};

pub struct RpcServer {
    boundary: Arc<Boundary>,
}

impl RpcServer {
    pub fn new(boundary: Arc<Boundary>) -> Self {
        Self { boundary }
    }

    /// Serve until `draining` is cancelled and open calls finish.
    pub async fn run(self, listener: TcpListener, draining: CancellationToken) -> Result<(), BoxError> {
        let addr = listener.local_addr()?;
        let (reporter, health) = tonic_health::server::health_reporter();
        reporter.set_service_status("", ServingStatus::Serving).await;

        tracing::info!(address = %addr, "gRPC server starting");

        Server::builder()
            .layer(BoundaryLayer::new(self.boundary))
            .add_service(health)
            .serve_with_incoming_shutdown(TcpIncoming::from(listener), async move {
                draining.cancelled().await
            })
            .await?;

        tracing::info!("gRPC server stopped");
        Ok(())
    }

    pub fn spawn(self, listener: TcpListener, draining: CancellationToken) -> JoinHandle<Result<(), BoxError>> {
        tokio::spawn(self.run(listener, draining))
    }
}
