//! Startup orchestration.
//!
//! # Responsibilities
//! - Install the process subscriber and metrics recorder
//! - Build the tracing stack (sampler, exporter, span processor, tracker)
//! - Build the request logger
//!
//! # Design Decisions
//! - Fail fast: any startup error is fatal
//! - Subsystems initialize in order, not concurrently
//! - Listeners start last (traffic only when ready), in each service module

use std::sync::Arc;

use thiserror::Error;
use tokio::net::TcpListener;

use crate::config::{ConfigError, ExporterKind, Role, SamplerKind, ServiceConfig, TracingConfig};
use crate::http::{api, ApiState, HttpServer};
use crate::lifecycle::shutdown::{Release, ServerTask, ShutdownCoordinator, ShutdownReport, Stage};
use crate::lifecycle::signals;
use crate::messaging::{consumer, LogMessages, Publisher};
use crate::middleware::Boundary;
use crate::observability::{logging, metrics, Logger};
use crate::rpc::{RpcClient, RpcServer};
use crate::telemetry::export::{LogExporter, NoopExporter, OtlpHttpExporter};
use crate::telemetry::sampler::{AlwaysSample, NeverSample, ParentBased, RateLimited, TraceIdRatio};
use crate::telemetry::{BatchConfig, ExportError, Sampler, SpanExporter, SpanProcessor, SpanTracker};

#[derive(Debug, Error)]
pub enum StartupError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("failed to install log subscriber: {0}")]
    Logging(#[from] tracing_subscriber::util::TryInitError),
    #[error("failed to set up span export: {0}")]
    Export(#[from] ExportError),
    #[error("failed to bind {address}: {source}")]
    Bind {
        address: String,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid endpoint {endpoint}: {source}")]
    Endpoint {
        endpoint: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
}

/// Process-level observability: subscriber first, then metrics.
pub fn init_process(config: &ServiceConfig) -> Result<(), StartupError> {
    logging::init_subscriber(&config.logging)?;
    if config.metrics.enabled {
        match config.metrics.address.parse() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(_) => tracing::error!(
                metrics_address = %config.metrics.address,
                "Failed to parse metrics address"
            ),
        }
    }
    Ok(())
}

/// Everything a service needs to trace and log requests.
#[derive(Clone)]
pub struct Telemetry {
    pub tracker: Arc<SpanTracker>,
    pub processor: Arc<SpanProcessor>,
    pub logger: Logger,
}

impl Telemetry {
    /// Build from config. Must run inside a Tokio runtime.
    pub fn from_config(config: &ServiceConfig) -> Result<Self, StartupError> {
        let exporter = build_exporter(config)?;
        Ok(Self::with_exporter(
            &config.tracing,
            exporter,
            logging::request_logger(&config.logging),
        ))
    }

    /// Build around an explicit exporter and logger.
    pub fn with_exporter(tracing: &TracingConfig, exporter: Arc<dyn SpanExporter>, logger: Logger) -> Self {
        let processor = Arc::new(SpanProcessor::spawn(exporter, batch_config(tracing)));
        let tracker = SpanTracker::new()
            .with_sampler(build_sampler(tracing))
            .with_export_queue(processor.queue());
        tracing::info!(
            sampler = ?tracing.sampler,
            exporter = ?tracing.exporter,
            "Tracing initialized"
        );
        Self {
            tracker: Arc::new(tracker),
            processor,
            logger,
        }
    }
}

impl std::fmt::Debug for Telemetry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Telemetry").finish_non_exhaustive()
    }
}

/// Bind the role's listener, serve it, and block until shutdown completes.
pub async fn run_service(role: Role, config: ServiceConfig) -> Result<ShutdownReport, StartupError> {
    let telemetry = Telemetry::from_config(&config)?;
    let shutdown = ShutdownCoordinator::from_config(&config.shutdown);

    let address = config.bind_address(role);
    let listener = TcpListener::bind(&address)
        .await
        .map_err(|source| StartupError::Bind {
            address: address.clone(),
            source,
        })?;
    tracing::info!(
        service = %config.service_name,
        role = %role,
        address = %address,
        "Listening for connections"
    );

    start_service(role, &config, listener, &telemetry, &shutdown)?;
    Ok(shutdown.run(signals::termination()).await)
}

/// Spawn the role's server on `listener` and register everything it owns
/// with `shutdown`: the server (inbound), its outbound clients, then the
/// span processor.
pub fn start_service(
    role: Role,
    config: &ServiceConfig,
    listener: TcpListener,
    telemetry: &Telemetry,
    shutdown: &ShutdownCoordinator,
) -> Result<(), StartupError> {
    let boundary = Arc::new(Boundary::new(
        transport(role),
        telemetry.tracker.clone(),
        telemetry.logger.clone(),
        shutdown.clone(),
    ));
    let draining = shutdown.draining();

    let task = match role {
        Role::Api => {
            let rpc = RpcClient::new(&config.peer).map_err(|e| StartupError::Endpoint {
                endpoint: config.peer.rpc_endpoint.clone(),
                source: Box::new(e),
            })?;
            let publisher = Publisher::new(&config.peer).map_err(|e| StartupError::Endpoint {
                endpoint: config.peer.push_endpoint.clone(),
                source: Box::new(e),
            })?;
            shutdown.register(Stage::Outbound, Release::new("rpc client", rpc.clone()));
            shutdown.register(Stage::Outbound, Release::new("publisher", publisher.clone()));

            let state = ApiState {
                rpc,
                publisher,
                logger: telemetry.logger.clone(),
            };
            let app = api::app(state, boundary, config.listener.request_timeout());
            HttpServer::new("api", app).spawn(listener, draining)
        }
        Role::Rpc => RpcServer::new(boundary).spawn(listener, draining),
        Role::Consumer => {
            let handler = Arc::new(LogMessages::new(telemetry.logger.clone()));
            HttpServer::new("consumer", consumer::router(boundary, handler)).spawn(listener, draining)
        }
    };

    shutdown.register(Stage::Inbound, ServerTask::new(role.as_str(), task));
    shutdown.register(Stage::Telemetry, telemetry.processor.clone());
    Ok(())
}

fn transport(role: Role) -> &'static str {
    match role {
        Role::Api => "http",
        Role::Rpc => "rpc",
        Role::Consumer => "message",
    }
}

pub fn build_sampler(config: &TracingConfig) -> Box<dyn Sampler> {
    let arg = config.sampler_arg;
    match config.sampler {
        SamplerKind::Always => Box::new(AlwaysSample),
        SamplerKind::Never => Box::new(NeverSample),
        SamplerKind::Ratio => Box::new(TraceIdRatio::new(arg.unwrap_or(1.0))),
        SamplerKind::ParentRatio => Box::new(ParentBased::new(TraceIdRatio::new(arg.unwrap_or(1.0)))),
        SamplerKind::RateLimited => Box::new(RateLimited::new(arg.unwrap_or(1.0))),
    }
}

pub fn build_exporter(config: &ServiceConfig) -> Result<Arc<dyn SpanExporter>, ExportError> {
    let exporter: Arc<dyn SpanExporter> = match config.tracing.exporter {
        ExporterKind::Otlp => Arc::new(OtlpHttpExporter::new(
            &config.tracing.otlp_endpoint,
            config.service_name.clone(),
            config.tracing.export_timeout(),
        )?),
        ExporterKind::Log => Arc::new(LogExporter),
        ExporterKind::None => Arc::new(NoopExporter),
    };
    Ok(exporter)
}

pub fn batch_config(config: &TracingConfig) -> BatchConfig {
    BatchConfig {
        queue_capacity: config.queue_capacity,
        max_batch_size: config.max_batch_size,
        interval: config.batch_interval(),
    }
}
