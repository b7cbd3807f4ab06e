//! WebSocket subscription endpoint.
//!
//! # Responsibilities
//! - Complete the upgrade handshake with the dashboard client
//! - Hand the socket to the hub's subscriber connection
//!
//! # Data Flow
//! ```text
//! Client ──── GET /ws (upgrade) ───▶ Gateway ─── serve_subscriber ───▶ hub
//! Client ◀─── JSON text frames ──── Gateway ◀── subscriber outbox ──── hub
//! ```
//!
//! # Design Decisions
//! - Inbound frames are capped at `hub.max_message_bytes`; the peer only
//!   needs to answer pings and close
//! - Ping/pong and close frames are handled in hub/connection.rs

use axum::extract::ws::WebSocketUpgrade;
use axum::extract::State;
use axum::response::Response;

use crate::http::server::AppState;
use crate::hub::{serve_subscriber, ConnectionSettings};

pub async fn ws_handler(State(state): State<AppState>, ws: WebSocketUpgrade) -> Response {
    let hub = state.hub.clone();
    let settings = ConnectionSettings::from(&state.config.hub);

    ws.max_message_size(state.config.hub.max_message_bytes)
        .on_failed_upgrade(|e| tracing::warn!(error = %e, "WebSocket upgrade failed"))
        .on_upgrade(move |socket| serve_subscriber(socket, hub, settings))
}
