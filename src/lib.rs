//! Tracewire: a three-service skeleton (HTTP front door, gRPC backend,
//! push message consumer) with end-to-end trace propagation,
//! trace-correlated logging and graceful shutdown.

// Core subsystems
pub mod config;
pub mod http;
pub mod messaging;
pub mod rpc;

// Tracing pipeline
pub mod middleware;
pub mod propagation;
pub mod telemetry;

// Cross-cutting concerns
pub mod lifecycle;
pub mod observability;

pub use config::{Role, ServiceConfig};
pub use lifecycle::ShutdownCoordinator;
pub use middleware::Boundary;
pub use telemetry::{RequestContext, SpanTracker};
