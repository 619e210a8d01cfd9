//! Family platform gateway.
//!
//! # Architecture Overview
//!
//! ```text
//!                        ┌──────────────────────────────────────────────────┐
//!                        │                    GATEWAY                       │
//!                        │                                                  │
//!   HTTP request ────────┼─▶ routing ─▶ identity ─▶ rate limit ─▶ breaker ──┼─┐
//!                        │                                                  │ │
//!                        │                          cache ◀── hit ──────────┼─┤
//!                        │                                                  │ │ miss
//!   HTTP response ◀──────┼── metrics ◀── breaker result ◀── upstream call ◀─┼─┘
//!                        │                                                  │
//!   WebSocket ───────────┼─▶ connection manager ─▶ rooms ─▶ fan-out         │
//!                        │                                                  │
//!                        │  admin API · Prometheus · maintenance · shutdown │
//!                        └──────────────────────────────────────────────────┘
//! ```

use std::path::PathBuf;

use clap::Parser;

use family_gateway::config::{load_config, GatewayConfig};
use family_gateway::lifecycle;
use family_gateway::observability::logging::init_logging;

#[derive(Parser)]
#[command(name = "family-gateway")]
#[command(about = "Resilient gateway and real-time layer", long_about = None)]
struct Args {
    /// Path to the TOML configuration file.
    #[arg(short, long, env = "GATEWAY_CONFIG")]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => load_config(path)?,
        None => GatewayConfig::default(),
    };

    init_logging(&config.observability.log_level);
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "family-gateway starting");
    tracing::info!(
        bind_address = %config.listener.bind_address,
        routes = config.routes.len(),
        rate_limits = config.rate_limits.len(),
        realtime = config.realtime.enabled,
        admin = config.admin.enabled,
        "Configuration loaded"
    );
    if config.admin.enabled && config.admin.api_key == "CHANGE_ME_IN_PRODUCTION" {
        tracing::warn!("Admin API is using the placeholder key");
    }

    lifecycle::run(config).await?;

    tracing::info!("Shutdown complete");
    Ok(())
}
