//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! defaults (schema.rs)
//!     → optional TOML file (--config)
//!     → environment variables (PORT, GRPC_ENDPOINT, ...)
//!     → validation.rs (semantic checks, all errors at once)
//!     → ServiceConfig (validated, immutable)
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded
//! - All fields have defaults to allow minimal configs
//! - Environment lookup is injected so loading is testable
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::{load_config, load_with_env, ConfigError};
pub use schema::{
    ExporterKind, ListenerConfig, LogFormat, LoggingConfig, MetricsConfig, PeerConfig, Role,
    SamplerKind, ServiceConfig, ShutdownConfig, TracingConfig,
};
pub use validation::ValidationError;
