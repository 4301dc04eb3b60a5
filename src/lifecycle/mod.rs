//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup (startup.rs):
//!     Load config → Subscriber + metrics → Tracing stack → Start listeners
//!
//! Shutdown (shutdown.rs):
//!     Signal received → Stop accepting → Drain in-flight (grace period)
//!     → Force-cancel leftovers → Close inbound, outbound, telemetry → Exit
//!
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → Trigger graceful shutdown
//! ```
//!
//! # Design Decisions
//! - Ordered startup: config first, then observability, then listeners
//! - Ordered shutdown: stop accept, drain, close by stage
//! - Shutdown has timeout: forced termination after deadline
//! - Close failures are reported, never abort the sequence

pub mod shutdown;
pub mod signals;
pub mod startup;

pub use shutdown::{
    BoxError, CloseError, DrainOutcome, InFlightGuard, Release, Resource, ServerTask,
    ShutdownCoordinator, ShutdownReport, ShutdownState, Stage,
};
pub use startup::{init_process, run_service, start_service, StartupError, Telemetry};
