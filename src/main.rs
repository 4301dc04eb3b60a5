//! Tracewire service binary.
//!
//! ```text
//!            traceparent            traceparent            attributes
//!   client ───────────────▶  api  ───────────────▶  rpc
//!                             │
//!                             │   push (traceparent in message attributes)
//!                             └──────────────────────────▶  consumer
//! ```
//!
//! One process runs one role. Every role shares the same startup order
//! (config, subscriber, tracing stack, listener) and the same drain-then-close
//! shutdown sequence.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use tracewire::config::{load_config, Role};
use tracewire::lifecycle::{init_process, run_service};

#[derive(Parser)]
#[command(name = "tracewire")]
#[command(about = "Traced HTTP, gRPC and message services", long_about = None)]
struct Cli {
    /// TOML configuration file; environment variables override it
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// HTTP front door serving GET /health
    Api,
    /// gRPC backend serving grpc.health.v1.Health
    Rpc,
    /// Push consumer serving POST /push
    Consumer,
}

impl From<Commands> for Role {
    fn from(command: Commands) -> Self {
        match command {
            Commands::Api => Role::Api,
            Commands::Rpc => Role::Rpc,
            Commands::Consumer => Role::Consumer,
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let role = Role::from(cli.command);

    let config = load_config(cli.config.as_deref())?;
    init_process(&config)?;

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        role = %role,
        service = %config.service_name,
        "tracewire starting"
    );

    let report = run_service(role, config).await?;
    std::process::exit(report.exit_code());
}
