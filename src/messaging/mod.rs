//! Asynchronous messaging subsystem.
//!
//! # Data Flow
//! ```text
//! API handler
//!     → publisher.rs (attributes = encoded trace carrier)
//!     → POST {push_endpoint} with PushEnvelope (message.rs)
//!     → consumer.rs `POST /push`
//!     → middleware::deliver (carrier from attributes, consumer span)
//!     → MessageHandler → 204 ack / 5xx nack
//! ```
//!
//! # Design Decisions
//! - Push delivery over HTTP; the broker is out of scope
//! - Trace context rides in message attributes, not in HTTP headers

pub mod consumer;
pub mod message;
pub mod publisher;

pub use consumer::{LogMessages, MessageHandler, PUSH_PATH};
pub use message::{PushEnvelope, PushMessage};
pub use publisher::{PublishError, Publisher};
