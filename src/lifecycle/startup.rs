//! Startup orchestration.
//!
//! # Responsibilities
//! - Initialize subsystems in dependency order
//! - Start background tasks (hub, health checks)
//! - Bind the listener and begin accepting traffic
//!
//! # Design Decisions
//! - Fail fast: any startup error is fatal
//! - Hub first, listener last

use std::net::SocketAddr;

use thiserror::Error;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

use crate::config::GatewayConfig;
use crate::health::HealthMonitor;
use crate::http::{AppState, HttpServer, ServerError};
use crate::hub::FanoutHub;
use crate::lifecycle::Shutdown;

#[derive(Debug, Error)]
pub enum StartupError {
    #[error("failed to bind {address}: {source}")]
    Bind {
        address: String,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Server(#[from] ServerError),

    #[error("server task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// A started gateway.
pub struct Gateway {
    state: AppState,
    local_addr: SocketAddr,
    server: JoinHandle<Result<(), ServerError>>,
    hub: JoinHandle<()>,
}

impl Gateway {
    pub fn state(&self) -> &AppState {
        &self.state
    }

    /// Address actually bound (useful with port 0).
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Wait for the server to stop, then for the hub to close its subscribers.
    pub async fn wait(self) -> Result<(), StartupError> {
        self.server.await??;
        self.hub.await?;
        Ok(())
    }
}

/// Start every subsystem; each one stops when `shutdown` is triggered.
pub async fn start(config: GatewayConfig, shutdown: &Shutdown) -> Result<Gateway, StartupError> {
    let (hub, hub_task) = FanoutHub::spawn(&config.hub, shutdown.subscribe());

    let address = config.listener.bind_address.clone();
    let state = AppState::new(config, hub.clone())?;

    if state.config.health_check.enabled {
        let monitor = HealthMonitor::new(
            state.health_targets(),
            state.config.health_check.clone(),
            hub,
        );
        tokio::spawn(monitor.run(shutdown.subscribe()));
    }

    let listener = TcpListener::bind(&address)
        .await
        .map_err(|source| StartupError::Bind {
            address: address.clone(),
            source,
        })?;
    let local_addr = listener
        .local_addr()
        .map_err(|source| StartupError::Bind { address, source })?;

    tracing::info!(
        address = %local_addr,
        backends = state.upstreams.len(),
        admin = state.config.admin.enabled,
        "Gateway listening"
    );

    let server = HttpServer::new(state.clone());
    let server = tokio::spawn(server.run(listener, shutdown.subscribe()));

    Ok(Gateway {
        state,
        local_addr,
        server,
        hub: hub_task,
    })
}
