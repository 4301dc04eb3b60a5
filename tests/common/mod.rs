//! Shared utilities for integration tests.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;

use tracewire::config::{Role, ServiceConfig};
use tracewire::lifecycle::{start_service, ShutdownCoordinator, ShutdownReport, Telemetry};
use tracewire::observability::{FieldRegistry, Logger, MemorySink};
use tracewire::telemetry::export::MemoryExporter;

/// Log fields every test logger attaches when present.
pub const CONTEXT_FIELDS: [&str; 2] = ["request_id", "message_id"];

/// Captured output shared by every node of a test.
#[derive(Clone, Default)]
pub struct Capture {
    pub logs: MemorySink,
    pub spans: MemoryExporter,
}

impl Capture {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn telemetry(&self, config: &ServiceConfig) -> Telemetry {
        let logger = Logger::enriching(self.logs.clone(), FieldRegistry::from_context_keys(CONTEXT_FIELDS));
        Telemetry::with_exporter(&config.tracing, Arc::new(self.spans.clone()), logger)
    }
}

/// One running service on an ephemeral local port.
pub struct Node {
    pub addr: SocketAddr,
    pub shutdown: ShutdownCoordinator,
}

impl Node {
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    pub async fn stop(&self) -> ShutdownReport {
        self.shutdown.shutdown().await
    }
}

pub fn test_config() -> ServiceConfig {
    let mut config = ServiceConfig::default();
    config.shutdown.grace_period_secs = 2;
    config.shutdown.close_timeout_secs = 2;
    config
}

pub async fn start_node(role: Role, config: &ServiceConfig, capture: &Capture) -> Node {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let shutdown = ShutdownCoordinator::from_config(&config.shutdown);
    start_service(role, config, listener, &capture.telemetry(config), &shutdown).unwrap();
    Node { addr, shutdown }
}

/// rpc and consumer first, then an api pointed at both.
pub async fn start_stack(capture: &Capture) -> (Node, Node, Node) {
    let config = test_config();
    let rpc = start_node(Role::Rpc, &config, capture).await;
    let consumer = start_node(Role::Consumer, &config, capture).await;

    let mut api_config = config.clone();
    api_config.peer.rpc_endpoint = format!("http://{}", rpc.addr);
    api_config.peer.push_endpoint = consumer.url("/push");
    let api = start_node(Role::Api, &api_config, capture).await;

    (api, rpc, consumer)
}

pub fn client() -> reqwest::Client {
    reqwest::Client::builder()
        .pool_max_idle_per_host(0)
        .no_proxy()
        .timeout(Duration::from_secs(10))
        .build()
        .unwrap()
}

/// Poll until `probe` holds or the deadline passes.
pub async fn eventually(mut probe: impl FnMut() -> bool) -> bool {
    for _ in 0..200 {
        if probe() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}
