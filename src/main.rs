//! DevOps/AI backend-for-frontend gateway.
//!
//! # Architecture Overview
//!
//! ```text
//!                    ┌──────────────────────────────────────────────┐
//!                    │                  GATEWAY                      │
//!                    │                                               │
//!  Client Request    │  ┌─────────┐   ┌──────────┐   ┌───────────┐  │
//!  ──────────────────┼─▶│ request │──▶│ security │──▶│   proxy   │──┼──▶ Upstreams
//!                    │  │   id    │   │ identity │   │  handler  │  │    (work-tracking,
//!                    │  └─────────┘   │  + rate  │   └───────────┘  │     LLM provider)
//!                    │                │  limiter │                  │
//!                    │                └──────────┘                  │
//!                    │                                               │
//!                    │  ┌─────────────────────────────────────────┐ │
//!                    │  │          Cross-Cutting Concerns          │ │
//!                    │  │     ┌────────┐    ┌──────────────┐      │ │
//!                    │  │     │ config │    │observability │      │ │
//!                    │  │     └────────┘    └──────────────┘      │ │
//!                    │  └─────────────────────────────────────────┘ │
//!                    └──────────────────────────────────────────────┘
//! ```

use std::path::PathBuf;

use clap::Parser;
use tokio::net::TcpListener;

use devops_gateway::config::{load_config, GatewayConfig};
use devops_gateway::http::HttpServer;
use devops_gateway::observability::{logging, metrics};

#[derive(Parser, Debug)]
#[command(name = "devops-gateway")]
#[command(about = "Backend-for-frontend gateway for work-tracking and LLM upstreams")]
struct Args {
    /// Path to the TOML configuration file. Defaults apply when omitted.
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => load_config(path)?,
        None => GatewayConfig::default(),
    };

    logging::init_tracing(&config.observability.log_level);

    tracing::info!(
        bind_address = %config.listener.bind_address,
        devops_upstream = %config.upstream.devops_base_url,
        ai_upstream = %config.upstream.ai_base_url,
        rate_limiting = config.rate_limiting.enabled,
        "Configuration loaded"
    );

    let listener = TcpListener::bind(&config.listener.bind_address).await?;
    let local_addr = listener.local_addr()?;

    tracing::info!(address = %local_addr, "Listening for connections");

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let server = HttpServer::new(config);
    server.run(listener).await?;

    tracing::info!("Shutdown complete");
    Ok(())
}
