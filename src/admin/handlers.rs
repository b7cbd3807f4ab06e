use std::collections::BTreeMap;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use chrono::Utc;
use serde::Serialize;
use serde_json::json;

use crate::health::HealthState;
use crate::http::server::AppState;
use crate::hub::{kinds, HubStats};
use crate::resilience::{BreakerMetrics, BreakerState};

#[derive(Serialize)]
pub struct SystemStatus {
    pub version: &'static str,
    pub status: &'static str,
    pub uptime_secs: i64,
    pub backends: Vec<BackendStatus>,
    pub hub: HubStats,
}

#[derive(Serialize)]
pub struct BackendStatus {
    pub name: String,
    pub base_url: String,
    pub health: HealthState,
    pub breaker: Option<BreakerState>,
}

pub async fn get_status(State(state): State<AppState>) -> Json<SystemStatus> {
    let backends = state
        .upstreams
        .values()
        .map(|upstream| BackendStatus {
            name: upstream.name().to_string(),
            base_url: upstream.base_url().to_string(),
            health: state
                .health
                .get(upstream.name())
                .map(|h| h.state())
                .unwrap_or(HealthState::Unknown),
            breaker: state.registry.get(upstream.name()).map(|b| b.state()),
        })
        .collect();

    Json(SystemStatus {
        version: env!("CARGO_PKG_VERSION"),
        status: "operational",
        uptime_secs: (Utc::now() - state.started_at).num_seconds(),
        backends,
        hub: state.hub.stats(),
    })
}

pub async fn get_breakers(State(state): State<AppState>) -> Json<BTreeMap<String, BreakerMetrics>> {
    Json(state.registry.all_metrics())
}

pub async fn reset_all(State(state): State<AppState>) -> Json<serde_json::Value> {
    state.registry.reset_all();
    let names = state.registry.names();
    tracing::info!(breakers = ?names, "All circuit breakers reset by admin");

    state
        .hub
        .broadcast(kinds::BREAKER_RESET, json!({ "names": names, "all": true }), "admin");
    Json(json!({ "reset": names }))
}

pub async fn reset_one(State(state): State<AppState>, Path(name): Path<String>) -> Response {
    if !state.registry.reset(&name) {
        return (
            StatusCode::NOT_FOUND,
            Json(json!({ "error": "unknown breaker", "name": name })),
        )
            .into_response();
    }
    tracing::info!(breaker = %name, "Circuit breaker reset by admin");

    state
        .hub
        .broadcast(kinds::BREAKER_RESET, json!({ "names": [&name], "all": false }), "admin");
    Json(json!({ "reset": [name] })).into_response()
}

pub async fn get_hub(State(state): State<AppState>) -> Json<HubStats> {
    Json(state.hub.stats())
}
