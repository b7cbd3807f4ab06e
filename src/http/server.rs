//! HTTP server setup and configuration.
//!
//! # Responsibilities
//! - Build the shared application state (breakers, hub, upstream clients)
//! - Create the Axum router with all handlers
//! - Wire up middleware (timeout, tracing, request ID)
//! - Serve plain HTTP or TLS until shutdown
//! - Forward `/api/{backend}/...` requests through the backend's breaker
//! - Publish order creation to the hub

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::{
    body::Body,
    extract::{Path, State},
    http::{Method, Request, StatusCode},
    response::{IntoResponse, Response},
    routing::{any, get},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tower_http::{
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};

use crate::admin;
use crate::config::GatewayConfig;
use crate::health::{BackendHealth, HealthTarget};
use crate::http::{tls, websocket};
use crate::hub::{kinds, FanoutHub};
use crate::observability::metrics;
use crate::resilience::circuit_breaker::StateListener;
use crate::resilience::retries::RetryBudget;
use crate::resilience::{BreakerRegistry, BreakerState};
use crate::upstream::{UpstreamClient, UpstreamRequest};

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("backend '{name}' has an invalid base URL: {source}")]
    InvalidBackend {
        name: String,
        #[source]
        source: url::ParseError,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<GatewayConfig>,
    pub registry: Arc<BreakerRegistry>,
    pub hub: FanoutHub,
    pub upstreams: Arc<BTreeMap<String, Arc<UpstreamClient>>>,
    pub health: Arc<BTreeMap<String, Arc<BackendHealth>>>,
    pub started_at: DateTime<Utc>,
}

impl AppState {
    /// Build breakers and clients for every configured backend. Breaker
    /// transitions are announced on `hub`.
    pub fn new(config: GatewayConfig, hub: FanoutHub) -> Result<Self, ServerError> {
        let listener_hub = hub.clone();
        let listener: StateListener =
            Arc::new(move |name: &str, from: BreakerState, to: BreakerState| {
                listener_hub.broadcast(
                    kinds::BREAKER_STATE_CHANGED,
                    json!({ "name": name, "from": from, "to": to }),
                    "breaker",
                );
            });
        let registry =
            Arc::new(BreakerRegistry::from_config(&config.breakers).with_listener(listener));

        let budget = Arc::new(RetryBudget::new(config.retries.budget_ratio, 10));
        let mut upstreams = BTreeMap::new();
        let mut health = BTreeMap::new();
        for backend in &config.backends {
            let client = UpstreamClient::new(
                backend,
                registry.breaker(&backend.name),
                config.retries.clone(),
                budget.clone(),
                config.listener.max_body_bytes,
            )
            .map_err(|source| ServerError::InvalidBackend {
                name: backend.name.clone(),
                source,
            })?;
            upstreams.insert(backend.name.clone(), Arc::new(client));
            health.insert(
                backend.name.clone(),
                Arc::new(BackendHealth::new(
                    backend.name.clone(),
                    config.health_check.healthy_threshold,
                    config.health_check.unhealthy_threshold,
                )),
            );
        }

        Ok(Self {
            config: Arc::new(config),
            registry,
            hub,
            upstreams: Arc::new(upstreams),
            health: Arc::new(health),
            started_at: Utc::now(),
        })
    }

    /// Probe targets for the health monitor, one per backend.
    pub fn health_targets(&self) -> Vec<HealthTarget> {
        self.config
            .backends
            .iter()
            .filter_map(|backend| {
                let health = self.health.get(&backend.name)?.clone();
                let base = backend.base_url.trim_end_matches('/');
                let path = backend.health_path.trim_start_matches('/');
                Some(HealthTarget {
                    health,
                    probe_url: format!("{base}/{path}"),
                })
            })
            .collect()
    }
}

/// HTTP server for the gateway.
pub struct HttpServer {
    router: Router,
    config: Arc<GatewayConfig>,
}

impl HttpServer {
    pub fn new(state: AppState) -> Self {
        let config = state.config.clone();
        let router = Self::build_router(state);
        Self { router, config }
    }

    /// Build the Axum router with all middleware layers.
    #[allow(deprecated)]
    fn build_router(state: AppState) -> Router {
        let request_timeout = Duration::from_secs(state.config.timeouts.request_secs);

        let mut router = Router::new()
            .route("/ws", get(websocket::ws_handler))
            .route("/health", get(health_handler))
            .route("/api/{backend}/{*path}", any(proxy_handler));

        if state.config.admin.enabled {
            router = router.merge(admin::setup_admin_router(state.clone()));
        }

        router
            .with_state(state)
            .layer(TimeoutLayer::new(request_timeout))
            .layer(PropagateRequestIdLayer::x_request_id())
            .layer(TraceLayer::new_for_http())
            .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
    }

    /// Serve on `listener` until `shutdown` fires, then drain in-flight requests.
    pub async fn run(
        self,
        listener: TcpListener,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<(), ServerError> {
        let addr = listener.local_addr()?;

        match &self.config.listener.tls {
            Some(tls_config) => {
                let rustls = tls::load_tls_config(tls_config).await?;
                let handle = axum_server::Handle::new();
                let drain = handle.clone();
                tokio::spawn(async move {
                    let _ = shutdown.recv().await;
                    drain.graceful_shutdown(Some(Duration::from_secs(10)));
                });

                tracing::info!(address = %addr, "HTTPS server starting");
                axum_server::from_tcp_rustls(listener.into_std()?, rustls)
                    .handle(handle)
                    .serve(self.router.into_make_service())
                    .await?;
            }
            None => {
                tracing::info!(address = %addr, "HTTP server starting");
                axum::serve(listener, self.router)
                    .with_graceful_shutdown(async move {
                        let _ = shutdown.recv().await;
                        tracing::info!("HTTP server draining");
                    })
                    .await?;
            }
        }

        tracing::info!("HTTP server stopped");
        Ok(())
    }

    /// The fully layered router, for serving in-process.
    pub fn into_router(self) -> Router {
        self.router
    }

    /// Get a reference to the config.
    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }
}

/// Liveness with a summary of breaker states.
async fn health_handler(State(state): State<AppState>) -> Json<Value> {
    let breakers: BTreeMap<String, BreakerState> = state
        .registry
        .all_metrics()
        .into_iter()
        .map(|(name, m)| (name, m.state))
        .collect();

    Json(json!({
        "status": "ok",
        "breakers": breakers,
        "subscribers": state.hub.stats().subscribers,
    }))
}

/// Forward a request to the named backend.
async fn proxy_handler(
    State(state): State<AppState>,
    Path((backend, path)): Path<(String, String)>,
    request: Request<Body>,
) -> Response {
    let start_time = Instant::now();
    let request_id = request
        .headers()
        .get("x-request-id")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("unknown")
        .to_string();

    let Some(upstream) = state.upstreams.get(&backend).cloned() else {
        tracing::warn!(request_id = %request_id, backend = %backend, "Unknown backend");
        return (
            StatusCode::NOT_FOUND,
            Json(json!({ "error": "unknown backend", "backend": backend })),
        )
            .into_response();
    };

    let (parts, body) = request.into_parts();
    let body = match axum::body::to_bytes(body, state.config.listener.max_body_bytes).await {
        Ok(bytes) => bytes,
        Err(e) => {
            tracing::warn!(request_id = %request_id, error = %e, "Request body rejected");
            return (StatusCode::PAYLOAD_TOO_LARGE, "Request body too large").into_response();
        }
    };

    let path_and_query = match parts.uri.query() {
        Some(query) => format!("/{path}?{query}"),
        None => format!("/{path}"),
    };
    tracing::debug!(
        request_id = %request_id,
        backend = %backend,
        method = %parts.method,
        path = %path_and_query,
        "Proxying request"
    );

    let method = parts.method.clone();
    let outgoing = UpstreamRequest {
        method: parts.method,
        path_and_query,
        headers: parts.headers,
        body,
    };

    match upstream.send(outgoing).await {
        Ok(response) => {
            metrics::record_request(&backend, method.as_str(), response.status.as_u16(), start_time);

            if method == Method::POST && is_order_path(&path) && response.status.is_success() {
                let order: Value = serde_json::from_slice(&response.body).unwrap_or(Value::Null);
                state.hub.broadcast(
                    kinds::ORDER_CREATED,
                    json!({ "backend": backend, "order": order }),
                    &backend,
                );
            }
            response.into_response()
        }
        Err(e) => {
            let status = e.status_code();
            metrics::record_request(&backend, method.as_str(), status.as_u16(), start_time);
            if e.is_circuit_open() {
                tracing::debug!(request_id = %request_id, backend = %backend, "Circuit open, request refused");
            } else {
                tracing::warn!(request_id = %request_id, backend = %backend, error = %e, "Upstream request failed");
            }
            e.into_response()
        }
    }
}

fn is_order_path(path: &str) -> bool {
    path.trim_matches('/') == "orders"
}
