//! Health-check RPC client.
//!
//! Every call carries the caller's trace context in its metadata.

use std::time::Duration;

use tonic::metadata::{AsciiMetadataValue, MetadataKey};
use tonic::transport::{Channel, Endpoint};
use tonic_health::pb::health_check_response::ServingStatus;
use tonic_health::pb::health_client::HealthClient;
use tonic_health::pb::HealthCheckRequest;

use crate::config::PeerConfig;
use crate::telemetry::RequestContext;

#[derive(Debug, Clone)]
pub struct RpcClient {
    inner: HealthClient<Channel>,
}

impl RpcClient {
    /// Connects lazily; an unreachable peer surfaces on the first call.
    pub fn new(config: &PeerConfig) -> Result<Self, tonic::transport::Error> {
        Self::connect_lazy(&config.rpc_endpoint, config.timeout())
    }

    pub fn connect_lazy(endpoint: &str, timeout: Duration) -> Result<Self, tonic::transport::Error> {
        let channel = Endpoint::from_shared(endpoint.to_string())?
            .timeout(timeout)
            .connect_timeout(timeout)
            .connect_lazy();
        Ok(Self {
            inner: HealthClient::new(channel),
        })
    }

    /// Ask the peer for the status of `service` ("" is the whole server).
    pub async fn check(&self, ctx: &RequestContext, service: &str) -> Result<ServingStatus, tonic::Status> {
        let mut request = tonic::Request::new(HealthCheckRequest {
            service: service.to_string(),
        });

        let metadata = request.metadata_mut();
        for (name, value) in ctx.outbound_carrier().iter() {
            let key = MetadataKey::from_bytes(name.as_bytes());
            let value = value.parse::<AsciiMetadataValue>();
            match (key, value) {
                (Ok(key), Ok(value)) => {
                    metadata.insert(key, value);
                }
                _ => tracing::debug!(key = %name, "Skipping unrepresentable trace metadata"),
            }
        }

        let response = self.inner.clone().check(request).await?;
        Ok(response.into_inner().status())
    }
}
