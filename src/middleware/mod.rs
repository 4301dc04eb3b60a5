//! Boundary middleware subsystem.
//!
//! # Data Flow
//! ```text
//! Inbound call (HTTP request / gRPC call / message delivery)
//!     → layer.rs or message.rs (extract carrier from headers / attributes)
//!     → boundary.rs
//!         shutdown admission (refuse while draining)
//!         → decode carrier → start span (child or root)
//!         → handler(RequestContext) ── "trace start" / "trace done"
//!         → end span on every exit path
//!     → response / acknowledgement
//! ```
//!
//! # Design Decisions
//! - One core for every transport; adapters only translate metadata
//! - Span end is tied to a drop guard, so panics and dropped futures count
//! - Outbound propagation stays with the handler

pub mod boundary;
pub mod layer;
pub mod message;

pub use boundary::{Boundary, BoundaryError, CallOutcome, CallState};
pub use layer::{BoundaryLayer, RejectResponse, Traced, X_REQUEST_ID};
pub use message::{deliver, Acknowledgement, NackReason};
