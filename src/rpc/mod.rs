//! RPC subsystem.
//!
//! # Data Flow
//! ```text
//! client.rs check(ctx)
//!     → carrier injected into gRPC metadata
//!     → server.rs BoundaryLayer (server span, "trace start")
//!     → grpc.health.v1.Health/Check → SERVING
//!     → "trace done", span ended
//! ```
//!
//! # Design Decisions
//! - The standard health service instead of a bespoke proto
//! - Channels connect lazily so startup order between services does not matter

pub mod client;
pub mod server;

pub use client::RpcClient;
pub use server::RpcServer;
