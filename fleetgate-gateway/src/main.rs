//! # Fleetgate Binary
//!
//! Entry point for the Fleetgate proxy: a model-aware reverse proxy and
//! load balancer for fleets of LLM inference backends (Ollama, LM Studio,
//! vLLM, llama.cpp).
//!
//! ## Usage
//!
//! ```bash
//! # Default configuration file (fleetgate.toml)
//! fleetgate-gateway
//!
//! # Custom configuration and bind address
//! fleetgate-gateway --config fleet.toml --host 0.0.0.0 --port 8080
//!
//! # Verbose logging
//! fleetgate-gateway --log-level debug
//! ```
//!
//! Environment overrides: `FLEETGATE_HOST`, `FLEETGATE_PORT`,
//! `FLEETGATE_STRATEGY`, plus `RUST_LOG` for fine-grained log filtering.

use clap::Parser;
use fleetgate_gateway::config::Config;

/// Command line arguments for the Fleetgate server.
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the TOML configuration file
    #[arg(short, long, default_value = "fleetgate.toml")]
    config: String,

    /// Override the bind host from the configuration
    #[arg(long)]
    host: Option<String>,

    /// Override the bind port from the configuration
    #[arg(short, long)]
    port: Option<u16>,

    /// Logging level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&args.log_level)),
        )
        .init();

    let mut config = Config::load(&args.config)?;
    if let Some(host) = args.host {
        config.server.host = host;
    }
    if let Some(port) = args.port {
        config.server.port = port;
    }

    tracing::info!(
        endpoints = config.endpoints.len(),
        strategy = %config.proxy.strategy,
        "starting fleetgate"
    );
    fleetgate_gateway::server::run(config).await
}
