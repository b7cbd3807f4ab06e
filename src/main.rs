//! Strangler-fig gateway.
//!
//! # Architecture Overview
//!
//! ```text
//!                          ┌───────────────────────────────────────────────┐
//!                          │                    GATEWAY                     │
//!   Client request         │  ┌────────┐   ┌──────────┐   ┌─────────────┐  │
//!   ───────────────────────┼─▶│  http  │──▶│ upstream │──▶│  breaker    │──┼──▶ legacy / modern
//!                          │  │ server │   │  client  │   │  registry   │  │
//!                          │  └───┬────┘   └────┬─────┘   └──────┬──────┘  │
//!                          │      │ /ws         │ order.created  │ state   │
//!                          │      ▼             ▼                ▼ changes │
//!   Dashboard subscribers  │  ┌─────────────────────────────────────────┐  │
//!   ◀──────────────────────┼──│            fan-out hub                  │  │
//!                          │  └─────────────────────────────────────────┘  │
//!                          │   config · health · observability · lifecycle │
//!                          └───────────────────────────────────────────────┘
//! ```

use std::path::PathBuf;

use clap::Parser;

use strangler_proxy::config::{load_config, GatewayConfig};
use strangler_proxy::lifecycle::{self, signals, Shutdown};
use strangler_proxy::observability::{logging, metrics};

#[derive(Parser)]
#[command(name = "strangler-proxy")]
#[command(about = "Circuit-breaking gateway with real-time event fan-out", long_about = None)]
struct Args {
    /// Path to the TOML configuration file. Defaults are used when omitted.
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

    logging::init_logging(&config.observability);
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "strangler-proxy starting");
    tracing::info!(
        bind_address = %config.listener.bind_address,
        backends = config.backends.len(),
        request_timeout_secs = config.timeouts.request_secs,
        config_file = ?args.config,
        "Configuration loaded"
    );

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(e) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                error = %e,
                "Failed to parse metrics address"
            ),
        }
    }

    let shutdown = Shutdown::new();
    let gateway = lifecycle::start(config, &shutdown).await?;
    let wait = gateway.wait();
    tokio::pin!(wait);

    tokio::select! {
        result = &mut wait => result?,
        _ = signals::wait_for_signal() => {
            shutdown.trigger();
            wait.await?;
        }
    }

    tracing::info!("Shutdown complete");
    Ok(())
}
