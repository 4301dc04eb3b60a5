//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (axum serve, graceful shutdown on drain)
//!     → catch-panic → request id → BoundaryLayer → timeout
//!     → api.rs GET /health
//!         → rpc::RpcClient::check (carrier in metadata)
//!         → messaging::Publisher::publish (carrier in attributes)
//!     → "OK" / 503 dependency down / 500 internal
//! ```

pub mod api;
pub mod server;

pub use api::{ApiState, HealthError, HEALTH_PATH};
pub use server::{traced, HttpServer};
